//! Transaction metadata cache
//!
//! Maps append indexes to the log position right before their entry so
//! readers can seek straight to a chunk. Entries are written once by the
//! appender thread; old entries fall out through LRU retention.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::append_index::AppendIndex;
use crate::position::LogPosition;

/// Default number of cached entries.
pub const DEFAULT_METADATA_CACHE_CAPACITY: usize = 100_000;

/// Bounded append-index → log-position cache.
pub struct MetadataCache {
    entries: Mutex<LruCache<AppendIndex, LogPosition>>,
}

impl MetadataCache {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Record where the entry for `append_index` starts.
    pub fn cache_transaction_metadata(&self, append_index: AppendIndex, position: LogPosition) {
        self.entries.lock().put(append_index, position);
    }

    /// Look up the position recorded for `append_index`.
    pub fn get(&self, append_index: AppendIndex) -> Option<LogPosition> {
        self.entries.lock().get(&append_index).copied()
    }

    /// Drop the entry for an append index that was rolled back.
    pub(crate) fn remove(&self, append_index: AppendIndex) {
        self.entries.lock().pop(&append_index);
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    /// Remove everything
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new(DEFAULT_METADATA_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
