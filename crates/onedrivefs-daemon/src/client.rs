//! Remote storage client interface
//!
//! The dispatcher never speaks the remote protocol itself. Everything that
//! touches the network (authorization, token exchange, item operations)
//! goes through [`RemoteClient`]. Retry and backoff, if any, live in the
//! implementation; failures surface here once and are passed to the host
//! unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use onedrivefs_core::{AccessToken, EntryMetadata, OpenMode, RemoteError, RequestId};

/// One ranged read result
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadChunk {
    pub data: Bytes,
    /// More data exists past the end of this chunk
    pub has_more: bool,
}

/// Operations consumed from the remote storage service.
///
/// All paths are normalised absolute entry paths.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Run interactive authorization and obtain a fresh access token
    async fn authorize(&self) -> Result<(), RemoteError>;

    /// Bind this client to a previously issued token (no interaction)
    fn set_credential(&self, token: AccessToken);

    /// Token currently held by this client
    fn credential(&self) -> Option<AccessToken>;

    /// Revoke the authorization held by this client
    async fn unauthorize(&self) -> Result<(), RemoteError>;

    async fn list_directory(&self, path: &str) -> Result<Vec<EntryMetadata>, RemoteError>;

    async fn get_metadata(&self, path: &str) -> Result<EntryMetadata, RemoteError>;

    async fn open_file(
        &self,
        path: &str,
        request_id: RequestId,
        mode: OpenMode,
    ) -> Result<(), RemoteError>;

    /// Read `[offset, offset + length)`
    async fn read_file(&self, path: &str, offset: u64, length: u64)
        -> Result<ReadChunk, RemoteError>;

    async fn close_file(&self, path: &str, request_id: RequestId) -> Result<(), RemoteError>;

    async fn create_directory(&self, path: &str) -> Result<(), RemoteError>;

    async fn delete_entry(&self, path: &str) -> Result<(), RemoteError>;

    async fn move_entry(&self, source: &str, target: &str) -> Result<(), RemoteError>;

    async fn copy_entry(&self, source: &str, target: &str) -> Result<(), RemoteError>;

    async fn write_file(
        &self,
        path: &str,
        data: Bytes,
        offset: u64,
        request_id: RequestId,
    ) -> Result<(), RemoteError>;

    async fn truncate(&self, path: &str, length: u64) -> Result<(), RemoteError>;

    async fn create_file(&self, path: &str) -> Result<(), RemoteError>;
}

/// Creates unauthenticated clients for the session manager.
///
/// A new client is built for every mount and every resume, so no state
/// leaks from a revoked session into the next one.
pub trait RemoteConnector: Send + Sync {
    fn new_client(&self) -> Arc<dyn RemoteClient>;
}

