//! onedrivefs core - shared types, errors, configuration and path handling
//!
//! This crate contains the foundational types used by the provider daemon.
//! It has no dependencies on networking, storage or runtime code.

pub mod config;
pub mod error;
pub mod path;
pub mod types;

pub use config::{CacheConfig, Config, DispatchConfig, LoopbackConfig, ProviderConfig, StorageConfig};
pub use error::*;
pub use types::*;

/// File system identifier registered with the host
pub const FILE_SYSTEM_ID: &str = "onedrivefs";

/// Name the host shows for the mounted file system
pub const FILE_SYSTEM_NAME: &str = "OneDrive";

/// Persistent storage key holding the access token
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Maximum path length in bytes
pub const MAX_PATH_LEN: usize = 4096;

/// Maximum filename length in bytes
pub const MAX_FILENAME_LEN: usize = 255;
