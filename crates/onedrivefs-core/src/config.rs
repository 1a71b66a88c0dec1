//! Configuration system for onedrivefs
//!
//! Supports TOML configuration files with sensible defaults.
//! Configuration is loaded from:
//! - macOS: ~/Library/Application Support/onedrivefs/config.toml
//! - Linux: ~/.config/onedrivefs/config.toml
//! - Windows: %APPDATA%/onedrivefs/config.toml

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{FILE_SYSTEM_ID, FILE_SYSTEM_NAME};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How the file system is registered with the host
    pub provider: ProviderConfig,
    /// Metadata cache settings
    pub cache: CacheConfig,
    /// Request dispatch settings
    pub dispatch: DispatchConfig,
    /// Persistent state settings
    pub storage: StorageConfig,
    /// Local directory standing in for the remote drive
    pub loopback: LoopbackConfig,
}

/// Host registration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Identifier the mount is registered under
    pub file_system_id: String,
    /// Name shown by the host
    pub display_name: String,
    /// Whether the host may issue mutating requests
    pub writable: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            file_system_id: FILE_SYSTEM_ID.to_string(),
            display_name: FILE_SYSTEM_NAME.to_string(),
            writable: true,
        }
    }
}

/// Metadata cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum cached paths (0 = unbounded)
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 0 }
    }
}

/// Request dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Requests queued between the host and the dispatcher before backpressure
    pub max_inflight_requests: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_inflight_requests: 64,
        }
    }
}

/// Persistent state configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding the credential and mount registry
    /// (uses the system data dir if None)
    pub state_db: Option<PathBuf>,
}

/// Loopback drive configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    /// Directory served as the drive root (uses the system data dir if None)
    pub root: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("Failed to load config from {:?}: {}, using defaults", path, e);
                Self::default()
            }),
            None => {
                debug!("No config directory found, using defaults");
                Self::default()
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Effective state database path (config override or system default)
    pub fn state_db_path(&self) -> PathBuf {
        self.storage
            .state_db
            .clone()
            .or_else(|| Self::project_dirs().map(|dirs| dirs.data_dir().join("state.db")))
            .unwrap_or_else(|| PathBuf::from("/tmp/onedrivefs/state.db"))
    }

    /// Effective loopback drive root (config override or system default)
    pub fn loopback_root(&self) -> PathBuf {
        self.loopback
            .root
            .clone()
            .or_else(|| Self::project_dirs().map(|dirs| dirs.data_dir().join("drive")))
            .unwrap_or_else(|| PathBuf::from("/tmp/onedrivefs/drive"))
    }

    /// Generate a sample configuration file content
    pub fn sample() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("com", "onedrivefs", "onedrivefs")
    }
}

/// Configuration errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialize(String),
}
