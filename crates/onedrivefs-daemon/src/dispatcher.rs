//! Request dispatcher
//!
//! Every host request goes through [`Dispatcher::dispatch`]:
//!
//! ```text
//! HostRequest ──► readiness guard ──► handler ──► remote client
//!                 (resume if no        │            │
//!                  active client)      ▼            ▼
//!                                  cache / handle table updates
//!                                      │
//!                                      ▼
//!                          Result<Reply, AdapterError>
//! ```
//!
//! A guard failure ends the request before any remote call. Handlers
//! never hold a cache or table lock across an await, so requests for
//! different handles interleave freely.

use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use onedrivefs_core::path;
use onedrivefs_core::AdapterError;

use crate::cache::MetadataCache;
use crate::client::RemoteClient;
use crate::handles::HandleTable;
use crate::request::*;
use crate::session::SessionManager;

/// Routes host requests to the remote client and keeps cache and handle
/// table in step with the results
pub struct Dispatcher {
    session: Arc<SessionManager>,
    cache: MetadataCache,
    handles: HandleTable,
}

impl Dispatcher {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self::with_cache(session, MetadataCache::new())
    }

    pub fn with_cache(session: Arc<SessionManager>, cache: MetadataCache) -> Self {
        Self {
            session,
            cache,
            handles: HandleTable::new(),
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    /// Serve one host request. Always produces exactly one outcome.
    pub async fn dispatch(&self, request: HostRequest) -> Result<Reply, AdapterError> {
        let kind = request.kind();
        trace!("dispatch: {}", kind);

        let result = self.guarded(request).await;
        if let Err(ref e) = result {
            log_failure(kind, e);
        }
        result
    }

    /// Readiness guard: resume the session if needed, then handle
    async fn guarded(&self, request: HostRequest) -> Result<Reply, AdapterError> {
        let client = self.session.ensure_client().await?;
        self.handle(client, request).await
    }

    async fn handle(
        &self,
        client: Arc<dyn RemoteClient>,
        request: HostRequest,
    ) -> Result<Reply, AdapterError> {
        match request {
            HostRequest::ListDirectory(o) => self.list_directory(&*client, o).await,
            HostRequest::GetMetadata(o) => self.get_metadata(&*client, o).await,
            HostRequest::OpenFile(o) => self.open_file(&*client, o).await,
            HostRequest::ReadFile(o) => self.read_file(&*client, o).await,
            HostRequest::CloseFile(o) => self.close_file(&*client, o).await,
            HostRequest::CreateDirectory(o) => self.create_directory(&*client, o).await,
            HostRequest::DeleteEntry(o) => self.delete_entry(&*client, o).await,
            HostRequest::MoveEntry(o) => self.move_entry(&*client, o).await,
            HostRequest::CopyEntry(o) => self.copy_entry(&*client, o).await,
            HostRequest::WriteFile(o) => self.write_file(&*client, o).await,
            HostRequest::Truncate(o) => self.truncate(&*client, o).await,
            HostRequest::CreateFile(o) => self.create_file(&*client, o).await,
            HostRequest::Unmount(o) => self.unmount(o).await,
        }
    }

    async fn list_directory(
        &self,
        client: &dyn RemoteClient,
        options: ListDirectoryOptions,
    ) -> Result<Reply, AdapterError> {
        let dir = path::normalize(&options.directory_path)?;
        let since = self.cache.epoch();
        let entries = client.list_directory(&dir).await?;
        if !self.cache.put_since(&dir, entries.clone(), since) {
            debug!("dispatch: listing of {} raced a mutation, not cached", dir);
        }
        Ok(Reply::Entries {
            entries,
            has_more: false,
        })
    }

    async fn get_metadata(
        &self,
        client: &dyn RemoteClient,
        options: GetMetadataOptions,
    ) -> Result<Reply, AdapterError> {
        let entry_path = path::normalize(&options.entry_path)?;

        let cached = self.cache.get(&entry_path);
        let metadata = match cached.cached_metadata() {
            Some(metadata) => {
                trace!("dispatch: metadata cache hit for {}", entry_path);
                metadata.clone()
            }
            None => client.get_metadata(&entry_path).await?,
        };

        Ok(Reply::Metadata(if options.thumbnail {
            metadata
        } else {
            metadata.without_thumbnail()
        }))
    }

    async fn open_file(
        &self,
        client: &dyn RemoteClient,
        options: OpenFileOptions,
    ) -> Result<Reply, AdapterError> {
        let file_path = path::normalize(&options.file_path)?;

        // A reused id is refused before the remote session is opened
        if let Some(existing) = self.handles.get(options.request_id) {
            if existing.path != file_path {
                return Err(AdapterError::InternalConsistency {
                    request_id: options.request_id,
                    existing: existing.path,
                    requested: file_path,
                });
            }
        }

        client
            .open_file(&file_path, options.request_id, options.mode)
            .await?;

        // Another open claimed the id while ours was in flight
        if let Err(e) = self
            .handles
            .open(options.request_id, &file_path, options.mode)
        {
            if let Err(close_err) = client.close_file(&file_path, options.request_id).await {
                warn!(
                    "dispatch: releasing remote session {} for {} failed: {}",
                    options.request_id, file_path, close_err
                );
            }
            return Err(e);
        }
        Ok(Reply::Done)
    }

    async fn read_file(
        &self,
        client: &dyn RemoteClient,
        options: ReadFileOptions,
    ) -> Result<Reply, AdapterError> {
        let file_path = self.handles.lookup(options.open_request_id)?;
        let chunk = client
            .read_file(&file_path, options.offset, options.length)
            .await?;
        Ok(Reply::Chunk {
            data: chunk.data,
            has_more: chunk.has_more,
        })
    }

    async fn close_file(
        &self,
        client: &dyn RemoteClient,
        options: CloseFileOptions,
    ) -> Result<Reply, AdapterError> {
        let file_path = self.handles.lookup(options.open_request_id)?;
        client
            .close_file(&file_path, options.open_request_id)
            .await?;
        self.handles.close(options.open_request_id);
        Ok(Reply::Done)
    }

    async fn create_directory(
        &self,
        client: &dyn RemoteClient,
        options: CreateDirectoryOptions,
    ) -> Result<Reply, AdapterError> {
        let dir = path::normalize(&options.directory_path)?;
        client.create_directory(&dir).await?;
        Ok(Reply::Done)
    }

    async fn delete_entry(
        &self,
        client: &dyn RemoteClient,
        options: DeleteEntryOptions,
    ) -> Result<Reply, AdapterError> {
        let entry_path = path::normalize(&options.entry_path)?;
        client.delete_entry(&entry_path).await?;
        self.cache.remove_tree(&entry_path);
        Ok(Reply::Done)
    }

    async fn move_entry(
        &self,
        client: &dyn RemoteClient,
        options: MoveEntryOptions,
    ) -> Result<Reply, AdapterError> {
        let source = path::normalize(&options.source_path)?;
        let target = path::normalize(&options.target_path)?;
        client.move_entry(&source, &target).await?;
        self.cache.remove_tree(&source);
        self.cache.remove_tree(&target);
        Ok(Reply::Done)
    }

    async fn copy_entry(
        &self,
        client: &dyn RemoteClient,
        options: CopyEntryOptions,
    ) -> Result<Reply, AdapterError> {
        let source = path::normalize(&options.source_path)?;
        let target = path::normalize(&options.target_path)?;
        client.copy_entry(&source, &target).await?;
        self.cache.remove_tree(&source);
        self.cache.remove_tree(&target);
        Ok(Reply::Done)
    }

    async fn write_file(
        &self,
        client: &dyn RemoteClient,
        options: WriteFileOptions,
    ) -> Result<Reply, AdapterError> {
        let file_path = self.handles.lookup(options.open_request_id)?;
        client
            .write_file(
                &file_path,
                options.data,
                options.offset,
                options.open_request_id,
            )
            .await?;
        self.cache.remove(&file_path);
        Ok(Reply::Done)
    }

    async fn truncate(
        &self,
        client: &dyn RemoteClient,
        options: TruncateOptions,
    ) -> Result<Reply, AdapterError> {
        let file_path = path::normalize(&options.file_path)?;
        client.truncate(&file_path, options.length).await?;
        self.cache.remove_tree(&file_path);
        Ok(Reply::Truncated { has_more: false })
    }

    async fn create_file(
        &self,
        client: &dyn RemoteClient,
        options: CreateFileOptions,
    ) -> Result<Reply, AdapterError> {
        let file_path = path::normalize(&options.file_path)?;
        client.create_file(&file_path).await?;
        self.cache.remove_tree(&file_path);
        Ok(Reply::Done)
    }

    async fn unmount(&self, options: UnmountOptions) -> Result<Reply, AdapterError> {
        if options.file_system_id != self.session.file_system_id() {
            warn!(
                "dispatch: unmount requested for {}, serving {}",
                options.file_system_id,
                self.session.file_system_id()
            );
        }
        self.session.unmount().await?;
        self.handles.clear();
        self.cache.clear();
        Ok(Reply::Done)
    }
}

fn log_failure(kind: &str, e: &AdapterError) {
    if e.is_protocol_violation() {
        error!(protocol_violation = true, "dispatch: {} failed: {}", kind, e);
    } else {
        debug!("dispatch: {} failed: {}", kind, e);
    }
}
