//! Open-file handle table
//!
//! Maps the host's open-request id to the remote path it opened. Read,
//! write and close requests only carry the open-request id, so every one
//! of them goes through [`HandleTable::lookup`].
//!
//! Each key is inserted and removed as a single `DashMap` operation, so
//! concurrent requests against different handles never see a half-written
//! mapping.

use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use onedrivefs_core::{AdapterError, OpenMode, RequestId};

/// One open file
#[derive(Clone, Debug)]
pub struct OpenHandle {
    pub request_id: RequestId,
    pub path: String,
    pub mode: OpenMode,
    pub opened_at: Instant,
}

/// Open-request id → open file
#[derive(Default)]
pub struct HandleTable {
    handles: DashMap<RequestId, OpenHandle>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful open.
    ///
    /// Re-recording the same id for the same path is accepted. The same
    /// id for a different path means the host reused a live request id.
    pub fn open(
        &self,
        request_id: RequestId,
        path: &str,
        mode: OpenMode,
    ) -> Result<(), AdapterError> {
        match self.handles.entry(request_id) {
            Entry::Occupied(existing) if existing.get().path != path => {
                Err(AdapterError::InternalConsistency {
                    request_id,
                    existing: existing.get().path.clone(),
                    requested: path.to_string(),
                })
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(OpenHandle {
                    request_id,
                    path: path.to_string(),
                    mode,
                    opened_at: Instant::now(),
                });
                debug!("handles: opened {} -> {}", request_id, path);
                Ok(())
            }
        }
    }

    /// Path opened under `request_id`
    pub fn lookup(&self, request_id: RequestId) -> Result<String, AdapterError> {
        self.handles
            .get(&request_id)
            .map(|h| h.path.clone())
            .ok_or(AdapterError::HandleNotFound(request_id))
    }

    /// Full handle record for `request_id`
    pub fn get(&self, request_id: RequestId) -> Option<OpenHandle> {
        self.handles.get(&request_id).map(|h| h.clone())
    }

    /// Forget a handle. Closing an unknown id is treated as already closed.
    pub fn close(&self, request_id: RequestId) -> Option<OpenHandle> {
        let removed = self.handles.remove(&request_id).map(|(_, h)| h);
        if let Some(ref handle) = removed {
            debug!(
                "handles: closed {} -> {} after {:?}",
                request_id,
                handle.path,
                handle.opened_at.elapsed()
            );
        }
        removed
    }

    /// Drop every handle (unmount teardown)
    pub fn clear(&self) {
        self.handles.clear();
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
