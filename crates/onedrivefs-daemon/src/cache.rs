//! Path-keyed metadata cache
//!
//! Holds what the provider itself last learned about remote entries:
//! directory listings and the per-entry metadata observed in them.
//!
//! There is no TTL. Entries live until replaced by a newer listing or
//! removed after a mutation. The remote service does not guarantee fresh
//! metadata right after a move or copy, so mutations drop entries instead
//! of patching them and the next read goes back to the remote client.
//!
//! An optional capacity bound evicts least recently used paths. Eviction
//! only ever turns a hit into a miss.
//!
//! Every invalidation bumps an epoch. A listing that was fetched before an
//! invalidation touching its directory is dropped instead of stored, so a
//! slow list cannot bring back an entry that a faster delete removed.
//!
//! A directory listed before its parent gets a synthesised entry of its
//! own: named after the last path component, with `modification_time = 0`
//! (the Unix epoch) until a listing of the parent supplies the real value.

use std::collections::VecDeque;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::RwLock;
use tracing::trace;

use onedrivefs_core::path;
use onedrivefs_core::EntryMetadata;

/// Cached knowledge of one path
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheEntry {
    pub exists: bool,
    pub is_directory: bool,
    pub metadata: Option<EntryMetadata>,
    /// Listing of a directory entry, in remote order
    pub children: Vec<EntryMetadata>,
    /// Existence and metadata were determined by a listing
    pub resolved: bool,
}

impl CacheEntry {
    fn listed_directory(metadata: EntryMetadata, children: Vec<EntryMetadata>) -> Self {
        Self {
            exists: true,
            is_directory: true,
            metadata: Some(metadata),
            children,
            resolved: true,
        }
    }

    fn observed(metadata: EntryMetadata) -> Self {
        Self {
            exists: true,
            is_directory: metadata.is_directory,
            metadata: Some(metadata),
            children: Vec::new(),
            resolved: true,
        }
    }

    /// Metadata that can be served without asking the remote client
    pub fn cached_metadata(&self) -> Option<&EntryMetadata> {
        if self.resolved && self.exists {
            self.metadata.as_ref()
        } else {
            None
        }
    }
}

/// Invalidations remembered for racing listings
const INVALIDATION_LOG_LEN: usize = 256;

/// One recorded invalidation; `root == None` means the whole cache
struct Invalidation {
    epoch: u64,
    root: Option<String>,
}

struct CacheState {
    entries: LruCache<String, CacheEntry>,
    epoch: u64,
    recent: VecDeque<Invalidation>,
}

impl CacheState {
    fn new(entries: LruCache<String, CacheEntry>) -> Self {
        Self {
            entries,
            epoch: 0,
            recent: VecDeque::new(),
        }
    }

    fn invalidated(&mut self, root: Option<&str>) {
        self.epoch += 1;
        if self.recent.len() == INVALIDATION_LOG_LEN {
            self.recent.pop_front();
        }
        self.recent.push_back(Invalidation {
            epoch: self.epoch,
            root: root.map(str::to_string),
        });
    }

    /// Whether anything at, above or below `dir` was invalidated after `since`
    fn touched_since(&self, dir: &str, since: u64) -> bool {
        if since == self.epoch {
            return false;
        }
        // Older than the log reaches back: assume the worst
        match self.recent.front() {
            Some(oldest) if oldest.epoch <= since + 1 => {}
            _ => return true,
        }
        self.recent
            .iter()
            .filter(|inv| inv.epoch > since)
            .any(|inv| match inv.root.as_deref() {
                None => true,
                Some(root) => path::is_within(root, dir) || path::is_within(dir, root),
            })
    }
}

/// Metadata cache keyed by normalised entry path
pub struct MetadataCache {
    state: RwLock<CacheState>,
}

impl MetadataCache {
    /// Create an unbounded cache
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CacheState::new(LruCache::unbounded())),
        }
    }

    /// Create a cache bounded to `max_entries` paths (0 = unbounded)
    pub fn with_capacity(max_entries: usize) -> Self {
        match NonZeroUsize::new(max_entries) {
            Some(capacity) => Self {
                state: RwLock::new(CacheState::new(LruCache::new(capacity))),
            },
            None => Self::new(),
        }
    }

    /// Current invalidation epoch. Capture it before fetching a listing
    /// and hand it to [`put_since`](Self::put_since).
    pub fn epoch(&self) -> u64 {
        self.state.read().epoch
    }

    /// Replace the entry for `dir` with a fresh listing.
    ///
    /// Each listed child also gets a resolved entry. A child directory
    /// that was itself listed earlier keeps its children.
    pub fn put(&self, dir: &str, listing: Vec<EntryMetadata>) {
        let mut state = self.state.write();
        Self::store_listing(&mut state.entries, dir, listing);
    }

    /// Like [`put`](Self::put), for a listing fetched at epoch `since`.
    ///
    /// The listing is dropped if `dir`, an ancestor or a descendant was
    /// invalidated after `since`. Returns whether it was stored.
    pub fn put_since(&self, dir: &str, listing: Vec<EntryMetadata>, since: u64) -> bool {
        let mut state = self.state.write();
        if state.touched_since(dir, since) {
            trace!("cache: dropped listing of {} overtaken by invalidation", dir);
            return false;
        }
        Self::store_listing(&mut state.entries, dir, listing);
        true
    }

    fn store_listing(
        entries: &mut LruCache<String, CacheEntry>,
        dir: &str,
        listing: Vec<EntryMetadata>,
    ) {
        for child in &listing {
            let child_path = path::join(dir, &child.name);
            let mut entry = CacheEntry::observed(child.clone());
            if child.is_directory {
                if let Some(previous) = entries.peek(&child_path) {
                    if previous.is_directory {
                        entry.children = previous.children.clone();
                    }
                }
            }
            entries.put(child_path, entry);
        }

        let own = entries
            .peek(dir)
            .and_then(|e| e.metadata.clone())
            .filter(|m| m.is_directory)
            .unwrap_or_else(|| EntryMetadata::directory(path::file_name(dir), 0));

        trace!("cache: put {} ({} children)", dir, listing.len());
        entries.put(dir.to_string(), CacheEntry::listed_directory(own, listing));
    }

    /// Best-known entry for `path`; unresolved if nothing is cached
    pub fn get(&self, path: &str) -> CacheEntry {
        self.state
            .write()
            .entries
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop the entry for `path` (no-op if absent)
    pub fn remove(&self, path: &str) {
        let mut state = self.state.write();
        state.invalidated(Some(path));
        if state.entries.pop(path).is_some() {
            trace!("cache: removed {}", path);
        }
    }

    /// Drop `path` and every cached path beneath it
    pub fn remove_tree(&self, root: &str) {
        let mut state = self.state.write();
        state.invalidated(Some(root));

        let to_remove: Vec<String> = state
            .entries
            .iter()
            .filter(|(k, _)| path::is_within(k, root))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &to_remove {
            state.entries.pop(key);
        }

        if !to_remove.is_empty() {
            trace!("cache: removed {} entries under {}", to_remove.len(), root);
        }
    }

    /// Clear the entire cache
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.invalidated(None);
        state.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}
