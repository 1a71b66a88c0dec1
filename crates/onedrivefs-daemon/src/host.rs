//! Host mount registry interface
//!
//! The host keeps its own list of mounted provider file systems. The
//! session manager consults it before mounting and clears its entry on
//! unmount.

use async_trait::async_trait;
use thiserror::Error;

use onedrivefs_core::MountOptions;

/// Errors reported by the host while (un)registering a mount
#[derive(Error, Debug, Clone)]
pub enum HostError {
    #[error("mount rejected: {0}")]
    Rejected(String),

    #[error("host unavailable: {0}")]
    Unavailable(String),
}

/// Mount registration operations exposed by the host
#[async_trait]
pub trait HostRegistry: Send + Sync {
    /// Identifiers of all file systems currently mounted by this provider
    async fn mounted_file_systems(&self) -> Result<Vec<String>, HostError>;

    async fn mount(&self, options: &MountOptions) -> Result<(), HostError>;

    /// Remove the registration; unknown ids are not an error
    async fn unmount(&self, file_system_id: &str) -> Result<(), HostError>;
}
