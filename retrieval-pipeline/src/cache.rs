use std::{num::NonZeroUsize, sync::Arc};

use lru::LruCache;
use parking_lot::Mutex;

use crate::gateway::SearchResponse;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    query: String,
    k: usize,
}

/// Fixed-capacity LRU of finished search responses keyed by `(query, k)`.
///
/// Lookups refresh recency. The lock is only held for the map operation
/// itself, so callers must not expect single-flight behaviour on misses.
pub struct QueryCache {
    capacity: NonZeroUsize,
    entries: Mutex<LruCache<CacheKey, Arc<SearchResponse>>>,
}

impl QueryCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        // Grows on demand; large capacities must not preallocate.
        Self {
            capacity,
            entries: Mutex::new(LruCache::unbounded()),
        }
    }

    pub fn get(&self, query: &str, k: usize) -> Option<Arc<SearchResponse>> {
        let key = CacheKey {
            query: query.to_owned(),
            k,
        };
        self.entries.lock().get(&key).cloned()
    }

    pub fn insert(&self, query: &str, k: usize, response: Arc<SearchResponse>) {
        let key = CacheKey {
            query: query.to_owned(),
            k,
        };
        let mut entries = self.entries.lock();
        entries.put(key, response);
        while entries.len() > self.capacity.get() {
            entries.pop_lru();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }
}
