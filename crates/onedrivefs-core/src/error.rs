//! Error types for the onedrivefs provider

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::RequestId;

/// Rejected entry paths
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path is empty")]
    Empty,

    #[error("path contains null byte")]
    NullByte,

    #[error("parent directory (..) not allowed")]
    ParentDir,

    #[error("path too long: {len} bytes (max {max})")]
    PathTooLong { len: usize, max: usize },

    #[error("filename too long: {len} bytes (max {max})")]
    NameTooLong { len: usize, max: usize },
}

/// Error codes understood by the host file system surface
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderError {
    Failed,
    InUse,
    Exists,
    NotFound,
    AccessDenied,
    TooManyOpened,
    NoMemory,
    NoSpace,
    NotADirectory,
    InvalidOperation,
    Security,
    Abort,
    NotAFile,
    NotEmpty,
    InvalidUrl,
    Io,
}

impl ProviderError {
    /// Map to libc errno for POSIX hosts
    pub fn to_errno(self) -> i32 {
        match self {
            ProviderError::NotFound => libc::ENOENT,
            ProviderError::Exists => libc::EEXIST,
            ProviderError::AccessDenied => libc::EACCES,
            ProviderError::Security => libc::EPERM,
            ProviderError::InUse => libc::EBUSY,
            ProviderError::TooManyOpened => libc::EMFILE,
            ProviderError::NoMemory => libc::ENOMEM,
            ProviderError::NoSpace => libc::ENOSPC,
            ProviderError::NotADirectory => libc::ENOTDIR,
            ProviderError::NotAFile => libc::EISDIR,
            ProviderError::NotEmpty => libc::ENOTEMPTY,
            ProviderError::InvalidOperation => libc::EINVAL,
            ProviderError::InvalidUrl => libc::EINVAL,
            ProviderError::Abort => libc::ECANCELED,
            ProviderError::Io | ProviderError::Failed => libc::EIO,
        }
    }
}

/// Failure reported by the remote storage client.
///
/// The message is passed through opaquely; only the code is interpreted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code:?}: {message}")]
pub struct RemoteError {
    pub code: ProviderError,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: ProviderError, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderError::NotFound, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ProviderError::Failed, message)
    }
}

/// Errors produced while serving a host request or driving the session
#[derive(Error, Debug, Clone)]
pub enum AdapterError {
    #[error("file system is already mounted")]
    AlreadyMounted,

    #[error("authorization failed: {0}")]
    AuthorizationFailed(String),

    #[error("no access token stored")]
    CredentialNotFound,

    #[error("no open file for request {0}")]
    HandleNotFound(RequestId),

    #[error("remote operation failed: {0}")]
    RemoteOperationFailed(#[from] RemoteError),

    #[error("request {request_id} already open for {existing}, refusing {requested}")]
    InternalConsistency {
        request_id: RequestId,
        existing: String,
        requested: String,
    },

    #[error("host refused mount: {0}")]
    HostMountFailed(String),

    #[error("credential storage failed: {0}")]
    Storage(String),

    #[error("invalid path: {0}")]
    InvalidPath(#[from] PathError),

    #[error("provider is shutting down")]
    Shutdown,
}

impl AdapterError {
    /// Host or adapter broke the open/read/close protocol.
    ///
    /// These are logged apart from ordinary remote failures.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            AdapterError::HandleNotFound(_) | AdapterError::InternalConsistency { .. }
        )
    }

    /// Error code reported back to the host
    pub fn code(&self) -> ProviderError {
        match self {
            AdapterError::RemoteOperationFailed(e) => e.code,
            AdapterError::AlreadyMounted => ProviderError::Exists,
            AdapterError::AuthorizationFailed(_) => ProviderError::AccessDenied,
            AdapterError::HandleNotFound(_) => ProviderError::InvalidOperation,
            AdapterError::InternalConsistency { .. } => ProviderError::InvalidOperation,
            AdapterError::InvalidPath(_) => ProviderError::InvalidOperation,
            AdapterError::Shutdown => ProviderError::Abort,
            AdapterError::CredentialNotFound
            | AdapterError::HostMountFailed(_)
            | AdapterError::Storage(_) => ProviderError::Failed,
        }
    }
}
