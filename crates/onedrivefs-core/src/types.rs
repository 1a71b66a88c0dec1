//! Core type definitions for onedrivefs
//!
//! These types cross the boundary between the host request subsystem,
//! the dispatcher and the remote storage client.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Host-issued identifier of a single request.
///
/// For open-file requests this doubles as the open handle: later read,
/// write and close requests refer back to it as their `open_request_id`.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Debug, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Access mode requested when opening a file
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpenMode {
    Read,
    Write,
}

impl OpenMode {
    pub fn is_write(self) -> bool {
        matches!(self, OpenMode::Write)
    }
}

/// Metadata of a single remote entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    /// Seconds since the Unix epoch
    pub modification_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Data URL of a thumbnail, only returned when the host asks for it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

impl EntryMetadata {
    /// Metadata for a directory
    pub fn directory(name: impl Into<String>, modification_time: u64) -> Self {
        Self {
            name: name.into(),
            is_directory: true,
            size: 0,
            modification_time,
            mime_type: None,
            thumbnail: None,
        }
    }

    /// Metadata for a regular file
    pub fn file(name: impl Into<String>, size: u64, modification_time: u64) -> Self {
        Self {
            name: name.into(),
            is_directory: false,
            size,
            modification_time,
            mime_type: None,
            thumbnail: None,
        }
    }

    /// Convert a `SystemTime` to the seconds representation used here
    pub fn unix_seconds(time: SystemTime) -> u64 {
        time.duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs()
    }

    /// Copy of this metadata without the thumbnail
    pub fn without_thumbnail(mut self) -> Self {
        self.thumbnail = None;
        self
    }
}

/// Bearer credential issued by the remote service.
///
/// `Debug` is redacted so a token never ends up in a log line.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken(<{} bytes>)", self.0.len())
    }
}

/// Options the host passes when registering a mount
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountOptions {
    pub file_system_id: String,
    pub display_name: String,
    pub writable: bool,
}
