//! In-memory remote drive with call counters and failure switches

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use onedrivefs_core::path;
use onedrivefs_core::{
    AccessToken, EntryMetadata, MountOptions, OpenMode, ProviderConfig, ProviderError, RemoteError,
    RequestId,
};
use onedrivefs_daemon::{
    Dispatcher, HostError, HostRegistry, ReadChunk, RemoteClient, RemoteConnector, SessionManager,
    StateStore,
};

#[derive(Default)]
pub struct MockDrive {
    token: Mutex<Option<AccessToken>>,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    dirs: Mutex<BTreeSet<String>>,
    thumbnails: Mutex<BTreeMap<String, String>>,

    remote_calls: AtomicUsize,
    authorize_calls: AtomicUsize,

    pub fail_authorize: AtomicBool,
    pub fail_unauthorize: AtomicBool,
    /// Fail the next data operation with this code
    fail_next: Mutex<Option<ProviderError>>,

    /// Operation on a path that waits for `release`
    stall: Mutex<Option<(Stall, String)>>,
    stall_reached: Notify,
    gate: Notify,

    /// Remote sessions released through `close_file`
    closed: Mutex<Vec<(String, RequestId)>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stall {
    Read,
    List,
    Open,
}

impl MockDrive {
    pub fn new() -> Arc<Self> {
        let drive = Self::default();
        drive.dirs.lock().insert(path::ROOT.to_string());
        Arc::new(drive)
    }

    pub fn add_dir(&self, dir: &str) {
        self.dirs.lock().insert(dir.to_string());
    }

    pub fn add_file(&self, file: &str, contents: &[u8]) {
        self.files.lock().insert(file.to_string(), contents.to_vec());
    }

    pub fn set_thumbnail(&self, file: &str, thumbnail: &str) {
        self.thumbnails
            .lock()
            .insert(file.to_string(), thumbnail.to_string());
    }

    pub fn contents(&self, file: &str) -> Option<Vec<u8>> {
        self.files.lock().get(file).cloned()
    }

    pub fn exists(&self, entry: &str) -> bool {
        self.files.lock().contains_key(entry) || self.dirs.lock().contains(entry)
    }

    /// Data operations performed (credential handling excluded)
    pub fn remote_calls(&self) -> usize {
        self.remote_calls.load(Ordering::SeqCst)
    }

    pub fn authorize_calls(&self) -> usize {
        self.authorize_calls.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, code: ProviderError) {
        *self.fail_next.lock() = Some(code);
    }

    pub fn stall_reads_of(&self, file: &str) {
        *self.stall.lock() = Some((Stall::Read, file.to_string()));
    }

    /// Listings of `dir` are computed, then held until `release`
    pub fn stall_listings_of(&self, dir: &str) {
        *self.stall.lock() = Some((Stall::List, dir.to_string()));
    }

    /// Opens of `file` succeed remotely, then wait for `release`
    pub fn stall_opens_of(&self, file: &str) {
        *self.stall.lock() = Some((Stall::Open, file.to_string()));
    }

    /// Resolves once a stalled operation is waiting at the gate
    pub async fn stalled(&self) {
        self.stall_reached.notified().await;
    }

    pub fn release(&self) {
        *self.stall.lock() = None;
        self.gate.notify_one();
    }

    pub fn closed(&self) -> Vec<(String, RequestId)> {
        self.closed.lock().clone()
    }

    async fn pause(&self, op: Stall, entry: &str) {
        let hit = matches!(self.stall.lock().as_ref(), Some((o, p)) if *o == op && p == entry);
        if hit {
            self.stall_reached.notify_one();
            self.gate.notified().await;
        }
    }

    fn begin(&self) -> Result<(), RemoteError> {
        self.remote_calls.fetch_add(1, Ordering::SeqCst);
        if self.token.lock().is_none() {
            return Err(RemoteError::new(ProviderError::AccessDenied, "no token"));
        }
        match self.fail_next.lock().take() {
            Some(code) => Err(RemoteError::new(code, "injected failure")),
            None => Ok(()),
        }
    }

    fn metadata_of(&self, entry: &str) -> Option<EntryMetadata> {
        let name = path::file_name(entry).to_string();
        if self.dirs.lock().contains(entry) {
            return Some(EntryMetadata::directory(name, 1_000));
        }
        let size = self.files.lock().get(entry)?.len() as u64;
        let mut metadata = EntryMetadata::file(name, size, 2_000);
        metadata.thumbnail = self.thumbnails.lock().get(entry).cloned();
        Some(metadata)
    }

    fn entries_under(&self, root: &str) -> Vec<String> {
        let mut all: Vec<String> = self.dirs.lock().iter().cloned().collect();
        all.extend(self.files.lock().keys().cloned());
        all.into_iter()
            .filter(|p| path::is_within(p, root))
            .collect()
    }
}

#[async_trait]
impl RemoteClient for MockDrive {
    async fn authorize(&self) -> Result<(), RemoteError> {
        self.authorize_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_authorize.load(Ordering::SeqCst) {
            return Err(RemoteError::new(ProviderError::AccessDenied, "user declined"));
        }
        *self.token.lock() = Some(AccessToken::new("mock-token"));
        Ok(())
    }

    fn set_credential(&self, token: AccessToken) {
        *self.token.lock() = Some(token);
    }

    fn credential(&self) -> Option<AccessToken> {
        self.token.lock().clone()
    }

    async fn unauthorize(&self) -> Result<(), RemoteError> {
        *self.token.lock() = None;
        if self.fail_unauthorize.load(Ordering::SeqCst) {
            return Err(RemoteError::failed("revocation endpoint unreachable"));
        }
        Ok(())
    }

    async fn list_directory(&self, dir: &str) -> Result<Vec<EntryMetadata>, RemoteError> {
        self.begin()?;
        if !self.dirs.lock().contains(dir) {
            return Err(RemoteError::not_found(dir));
        }
        let children: Vec<String> = self
            .entries_under(dir)
            .into_iter()
            .filter(|p| path::parent(p) == Some(dir) && p != dir)
            .collect();
        let listing: Vec<EntryMetadata> = children
            .iter()
            .filter_map(|p| self.metadata_of(p))
            .collect();
        self.pause(Stall::List, dir).await;
        Ok(listing)
    }

    async fn get_metadata(&self, entry: &str) -> Result<EntryMetadata, RemoteError> {
        self.begin()?;
        self.metadata_of(entry)
            .ok_or_else(|| RemoteError::not_found(entry))
    }

    async fn open_file(
        &self,
        file: &str,
        _request_id: RequestId,
        _mode: OpenMode,
    ) -> Result<(), RemoteError> {
        self.begin()?;
        if !self.files.lock().contains_key(file) {
            return Err(RemoteError::not_found(file));
        }
        self.pause(Stall::Open, file).await;
        Ok(())
    }

    async fn read_file(&self, file: &str, offset: u64, length: u64) -> Result<ReadChunk, RemoteError> {
        self.begin()?;
        self.pause(Stall::Read, file).await;

        let files = self.files.lock();
        let data = files.get(file).ok_or_else(|| RemoteError::not_found(file))?;
        let size = data.len() as u64;
        let start = offset.min(size);
        let end = offset.saturating_add(length).min(size);
        Ok(ReadChunk {
            data: Bytes::copy_from_slice(&data[start as usize..end as usize]),
            has_more: end < size,
        })
    }

    async fn close_file(&self, file: &str, request_id: RequestId) -> Result<(), RemoteError> {
        self.begin()?;
        self.closed.lock().push((file.to_string(), request_id));
        Ok(())
    }

    async fn create_directory(&self, dir: &str) -> Result<(), RemoteError> {
        self.begin()?;
        if !self.dirs.lock().insert(dir.to_string()) {
            return Err(RemoteError::new(ProviderError::Exists, dir));
        }
        Ok(())
    }

    async fn delete_entry(&self, entry: &str) -> Result<(), RemoteError> {
        self.begin()?;
        let doomed = self.entries_under(entry);
        if doomed.is_empty() {
            return Err(RemoteError::not_found(entry));
        }
        for p in doomed {
            self.dirs.lock().remove(&p);
            self.files.lock().remove(&p);
        }
        Ok(())
    }

    async fn move_entry(&self, source: &str, target: &str) -> Result<(), RemoteError> {
        self.begin()?;
        if self.exists(target) {
            return Err(RemoteError::new(ProviderError::Exists, target));
        }
        let moved = self.entries_under(source);
        if moved.is_empty() {
            return Err(RemoteError::not_found(source));
        }
        for p in moved {
            let renamed = format!("{}{}", target, &p[source.len()..]);
            if self.dirs.lock().remove(&p) {
                self.dirs.lock().insert(renamed);
                continue;
            }
            let data = self.files.lock().remove(&p);
            if let Some(data) = data {
                self.files.lock().insert(renamed, data);
            }
        }
        Ok(())
    }

    async fn copy_entry(&self, source: &str, target: &str) -> Result<(), RemoteError> {
        self.begin()?;
        if self.exists(target) {
            return Err(RemoteError::new(ProviderError::Exists, target));
        }
        let copied = self.entries_under(source);
        if copied.is_empty() {
            return Err(RemoteError::not_found(source));
        }
        for p in copied {
            let renamed = format!("{}{}", target, &p[source.len()..]);
            if self.dirs.lock().contains(&p) {
                self.dirs.lock().insert(renamed);
            } else if let Some(data) = self.contents(&p) {
                self.files.lock().insert(renamed, data);
            }
        }
        Ok(())
    }

    async fn write_file(
        &self,
        file: &str,
        data: Bytes,
        offset: u64,
        _request_id: RequestId,
    ) -> Result<(), RemoteError> {
        self.begin()?;
        let mut files = self.files.lock();
        let contents = files.get_mut(file).ok_or_else(|| RemoteError::not_found(file))?;
        let end = offset as usize + data.len();
        if contents.len() < end {
            contents.resize(end, 0);
        }
        contents[offset as usize..end].copy_from_slice(&data);
        Ok(())
    }

    async fn truncate(&self, file: &str, length: u64) -> Result<(), RemoteError> {
        self.begin()?;
        let mut files = self.files.lock();
        let contents = files.get_mut(file).ok_or_else(|| RemoteError::not_found(file))?;
        contents.resize(length as usize, 0);
        Ok(())
    }

    async fn create_file(&self, file: &str) -> Result<(), RemoteError> {
        self.begin()?;
        if self.exists(file) {
            return Err(RemoteError::new(ProviderError::Exists, file));
        }
        self.files.lock().insert(file.to_string(), Vec::new());
        Ok(())
    }
}

/// Hands out the shared drive and counts client constructions
pub struct MockConnector {
    pub drive: Arc<MockDrive>,
    created: AtomicUsize,
}

impl MockConnector {
    pub fn new(drive: Arc<MockDrive>) -> Arc<Self> {
        Arc::new(Self {
            drive,
            created: AtomicUsize::new(0),
        })
    }

    pub fn clients_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl RemoteConnector for MockConnector {
    fn new_client(&self) -> Arc<dyn RemoteClient> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.drive.clone()
    }
}

/// Host registry that refuses every mount
pub struct RefusingHost;

#[async_trait]
impl HostRegistry for RefusingHost {
    async fn mounted_file_systems(&self) -> Result<Vec<String>, HostError> {
        Ok(Vec::new())
    }

    async fn mount(&self, _options: &MountOptions) -> Result<(), HostError> {
        Err(HostError::Rejected("quota of mounted providers reached".into()))
    }

    async fn unmount(&self, _file_system_id: &str) -> Result<(), HostError> {
        Ok(())
    }
}

pub struct Fixture {
    pub drive: Arc<MockDrive>,
    pub connector: Arc<MockConnector>,
    pub store: Arc<StateStore>,
    pub session: Arc<SessionManager>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Fixture {
    /// Unmounted provider over a fresh drive and state store
    pub fn new() -> Self {
        let drive = MockDrive::new();
        let store = Arc::new(StateStore::in_memory().unwrap());
        Self::with(drive, store)
    }

    /// Provider over an existing drive and store, as a restarted process
    pub fn with(drive: Arc<MockDrive>, store: Arc<StateStore>) -> Self {
        Self::with_host(drive, store.clone(), store)
    }

    pub fn with_host(
        drive: Arc<MockDrive>,
        store: Arc<StateStore>,
        host: Arc<dyn HostRegistry>,
    ) -> Self {
        let connector = MockConnector::new(drive.clone());
        let session = Arc::new(SessionManager::new(
            connector.clone(),
            host,
            store.clone(),
            ProviderConfig::default(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(session.clone()));
        Self {
            drive,
            connector,
            store,
            session,
            dispatcher,
        }
    }

    pub async fn mounted() -> Self {
        let fixture = Self::new();
        fixture.session.mount().await.unwrap();
        fixture
    }
}
