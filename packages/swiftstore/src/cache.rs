//! Shard-local cache entries and the LRU adapter.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use swiftstore_core::{Item, Key};

/// State of one cached key.
///
/// `Busy` marks a key whose fetch is still in flight: it carries no
/// attributes, so code holding a `Busy` entry has nothing to misread and must
/// wait for the fetch to settle.
#[derive(Debug, Clone)]
pub(crate) enum CacheEntry {
    /// The key is known absent from the table.
    NotExist,
    /// The key is present with these attributes.
    Exist(Arc<Item>),
    /// A fetch for the key is in flight.
    Busy,
}

impl CacheEntry {
    pub(crate) fn is_busy(&self) -> bool {
        matches!(self, Self::Busy)
    }
}

/// Fixed-capacity LRU of cache entries, owned by one node and touched only
/// under the node mutex.
pub(crate) struct EntryCache {
    entries: LruCache<Key, CacheEntry>,
}

impl EntryCache {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).expect("cache capacity must be positive");
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Looks up `key`, refreshing its recency.
    pub(crate) fn get(&mut self, key: &Key) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Inserts or overwrites, evicting the least-recently-used entry on
    /// overflow.
    pub(crate) fn insert(&mut self, key: Key, entry: CacheEntry) {
        self.entries.put(key, entry);
    }

    pub(crate) fn remove(&mut self, key: &Key) {
        self.entries.pop(key);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
