//! Loopback drive - a local directory served through [`RemoteClient`]
//!
//! Used by the CLI and the tests in place of the real cloud service. It
//! behaves like the remote API where the dispatcher can observe it:
//! operations require a token, files must be opened before they are
//! written, and reads report whether more data follows the chunk.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, trace};

use onedrivefs_core::path::{self, resolve_under};
use onedrivefs_core::{
    AccessToken, EntryMetadata, OpenMode, ProviderError, RemoteError, RequestId,
};

use crate::client::{ReadChunk, RemoteClient, RemoteConnector};

/// Bytes of randomness in an issued token
const TOKEN_BYTES: usize = 32;

/// Remote session for one open request
#[derive(Clone, Debug)]
struct OpenSession {
    path: String,
    mode: OpenMode,
}

/// A local directory behaving like a remote drive
pub struct LoopbackDrive {
    root: PathBuf,
    token: RwLock<Option<AccessToken>>,
    sessions: DashMap<RequestId, OpenSession>,
}

impl LoopbackDrive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            token: RwLock::new(None),
            sessions: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of open remote sessions
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn ensure_authorized(&self) -> Result<(), RemoteError> {
        if self.token.read().is_some() {
            Ok(())
        } else {
            Err(RemoteError::new(ProviderError::AccessDenied, "not authorized"))
        }
    }

    fn local(&self, entry_path: &str) -> Result<PathBuf, RemoteError> {
        self.ensure_authorized()?;
        resolve_under(&self.root, entry_path)
            .map_err(|e| RemoteError::new(ProviderError::InvalidOperation, e.to_string()))
    }
}

#[async_trait]
impl RemoteClient for LoopbackDrive {
    async fn authorize(&self) -> Result<(), RemoteError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error(e, "/"))?;

        let mut bytes = [0u8; TOKEN_BYTES];
        getrandom::fill(&mut bytes)
            .map_err(|e| RemoteError::failed(format!("token generation failed: {}", e)))?;

        *self.token.write() = Some(AccessToken::new(hex::encode(bytes)));
        debug!("loopback: issued token for {:?}", self.root);
        Ok(())
    }

    fn set_credential(&self, token: AccessToken) {
        *self.token.write() = Some(token);
    }

    fn credential(&self) -> Option<AccessToken> {
        self.token.read().clone()
    }

    async fn unauthorize(&self) -> Result<(), RemoteError> {
        let revoked = self.token.write().take();
        self.sessions.clear();
        match revoked {
            Some(_) => Ok(()),
            None => Err(RemoteError::new(ProviderError::AccessDenied, "not authorized")),
        }
    }

    async fn list_directory(&self, dir: &str) -> Result<Vec<EntryMetadata>, RemoteError> {
        let local = self.local(dir)?;
        let mut reader = fs::read_dir(&local).await.map_err(|e| io_error(e, dir))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(|e| io_error(e, dir))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            match entry.metadata().await {
                Ok(meta) => entries.push(metadata_to_entry(name, &meta)),
                // Removed between read_dir and stat
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(e, dir)),
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        trace!("loopback: listed {} ({} entries)", dir, entries.len());
        Ok(entries)
    }

    async fn get_metadata(&self, entry_path: &str) -> Result<EntryMetadata, RemoteError> {
        let local = self.local(entry_path)?;
        let meta = fs::metadata(&local)
            .await
            .map_err(|e| io_error(e, entry_path))?;
        Ok(metadata_to_entry(path::file_name(entry_path).to_string(), &meta))
    }

    async fn open_file(
        &self,
        entry_path: &str,
        request_id: RequestId,
        mode: OpenMode,
    ) -> Result<(), RemoteError> {
        let local = self.local(entry_path)?;
        let meta = fs::metadata(&local)
            .await
            .map_err(|e| io_error(e, entry_path))?;
        if meta.is_dir() {
            return Err(RemoteError::new(ProviderError::NotAFile, entry_path));
        }

        self.sessions.insert(
            request_id,
            OpenSession {
                path: entry_path.to_string(),
                mode,
            },
        );
        Ok(())
    }

    async fn read_file(
        &self,
        entry_path: &str,
        offset: u64,
        length: u64,
    ) -> Result<ReadChunk, RemoteError> {
        let local = self.local(entry_path)?;
        let mut file = fs::File::open(&local)
            .await
            .map_err(|e| io_error(e, entry_path))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| io_error(e, entry_path))?
            .len();

        if offset >= size {
            return Ok(ReadChunk {
                data: Bytes::new(),
                has_more: false,
            });
        }

        let end = offset.saturating_add(length).min(size);
        let mut buffer = vec![0u8; (end - offset) as usize];
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| io_error(e, entry_path))?;
        file.read_exact(&mut buffer)
            .await
            .map_err(|e| io_error(e, entry_path))?;

        Ok(ReadChunk {
            data: Bytes::from(buffer),
            has_more: end < size,
        })
    }

    async fn close_file(&self, entry_path: &str, request_id: RequestId) -> Result<(), RemoteError> {
        self.ensure_authorized()?;
        if let Some((_, session)) = self.sessions.remove(&request_id) {
            if session.path != entry_path {
                debug!(
                    "loopback: close of {} named {}, session was for {}",
                    request_id, entry_path, session.path
                );
            }
        }
        Ok(())
    }

    async fn create_directory(&self, entry_path: &str) -> Result<(), RemoteError> {
        let local = self.local(entry_path)?;
        fs::create_dir(&local)
            .await
            .map_err(|e| io_error(e, entry_path))
    }

    async fn delete_entry(&self, entry_path: &str) -> Result<(), RemoteError> {
        if entry_path == path::ROOT {
            return Err(RemoteError::new(ProviderError::AccessDenied, "cannot delete root"));
        }
        let local = self.local(entry_path)?;
        let meta = fs::metadata(&local)
            .await
            .map_err(|e| io_error(e, entry_path))?;
        let result = if meta.is_dir() {
            fs::remove_dir_all(&local).await
        } else {
            fs::remove_file(&local).await
        };
        result.map_err(|e| io_error(e, entry_path))
    }

    async fn move_entry(&self, source: &str, target: &str) -> Result<(), RemoteError> {
        let from = self.local(source)?;
        let to = self.local(target)?;
        if fs::try_exists(&to).await.unwrap_or(false) {
            return Err(RemoteError::new(ProviderError::Exists, target));
        }
        fs::rename(&from, &to)
            .await
            .map_err(|e| io_error(e, source))
    }

    async fn copy_entry(&self, source: &str, target: &str) -> Result<(), RemoteError> {
        let from = self.local(source)?;
        let to = self.local(target)?;
        if fs::try_exists(&to).await.unwrap_or(false) {
            return Err(RemoteError::new(ProviderError::Exists, target));
        }
        if path::is_within(target, source) {
            return Err(RemoteError::new(
                ProviderError::InvalidOperation,
                "cannot copy a directory into itself",
            ));
        }

        let meta = fs::metadata(&from).await.map_err(|e| io_error(e, source))?;
        if !meta.is_dir() {
            fs::copy(&from, &to).await.map_err(|e| io_error(e, source))?;
            return Ok(());
        }

        // Explicit stack instead of async recursion
        let mut pending = vec![(from, to)];
        while let Some((src_dir, dst_dir)) = pending.pop() {
            fs::create_dir(&dst_dir)
                .await
                .map_err(|e| io_error(e, target))?;
            let mut reader = fs::read_dir(&src_dir)
                .await
                .map_err(|e| io_error(e, source))?;
            while let Some(entry) = reader.next_entry().await.map_err(|e| io_error(e, source))? {
                let dst = dst_dir.join(entry.file_name());
                let kind = entry.file_type().await.map_err(|e| io_error(e, source))?;
                if kind.is_dir() {
                    pending.push((entry.path(), dst));
                } else {
                    fs::copy(entry.path(), &dst)
                        .await
                        .map_err(|e| io_error(e, source))?;
                }
            }
        }
        Ok(())
    }

    async fn write_file(
        &self,
        entry_path: &str,
        data: Bytes,
        offset: u64,
        request_id: RequestId,
    ) -> Result<(), RemoteError> {
        let local = self.local(entry_path)?;
        match self.sessions.get(&request_id).map(|s| s.clone()) {
            Some(session) if session.mode.is_write() && session.path == entry_path => {}
            Some(_) => {
                return Err(RemoteError::new(
                    ProviderError::AccessDenied,
                    format!("{} not opened for writing", entry_path),
                ))
            }
            None => {
                return Err(RemoteError::new(
                    ProviderError::InvalidOperation,
                    format!("no upload session for {}", request_id),
                ))
            }
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .open(&local)
            .await
            .map_err(|e| io_error(e, entry_path))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| io_error(e, entry_path))?;
        file.write_all(&data)
            .await
            .map_err(|e| io_error(e, entry_path))?;
        file.flush().await.map_err(|e| io_error(e, entry_path))
    }

    async fn truncate(&self, entry_path: &str, length: u64) -> Result<(), RemoteError> {
        let local = self.local(entry_path)?;
        let file = fs::OpenOptions::new()
            .write(true)
            .open(&local)
            .await
            .map_err(|e| io_error(e, entry_path))?;
        file.set_len(length)
            .await
            .map_err(|e| io_error(e, entry_path))
    }

    async fn create_file(&self, entry_path: &str) -> Result<(), RemoteError> {
        let local = self.local(entry_path)?;
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&local)
            .await
            .map(|_| ())
            .map_err(|e| io_error(e, entry_path))
    }
}

/// Builds a fresh [`LoopbackDrive`] over the same root for each session
pub struct LoopbackConnector {
    root: PathBuf,
}

impl LoopbackConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl RemoteConnector for LoopbackConnector {
    fn new_client(&self) -> Arc<dyn RemoteClient> {
        Arc::new(LoopbackDrive::new(self.root.clone()))
    }
}

fn io_error(e: std::io::Error, entry_path: &str) -> RemoteError {
    let code = match e.kind() {
        ErrorKind::NotFound => ProviderError::NotFound,
        ErrorKind::AlreadyExists => ProviderError::Exists,
        ErrorKind::PermissionDenied => ProviderError::AccessDenied,
        _ => ProviderError::Io,
    };
    RemoteError::new(code, format!("{}: {}", entry_path, e))
}

fn metadata_to_entry(name: String, meta: &std::fs::Metadata) -> EntryMetadata {
    let modified = meta
        .modified()
        .map(EntryMetadata::unix_seconds)
        .unwrap_or(0);

    if meta.is_dir() {
        EntryMetadata::directory(name, modified)
    } else {
        let mut entry = EntryMetadata::file(name, meta.len(), modified);
        entry.mime_type = guess_mime(&entry.name).map(str::to_string);
        entry
    }
}

fn guess_mime(name: &str) -> Option<&'static str> {
    let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "txt" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => return None,
    };
    Some(mime)
}
