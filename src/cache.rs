//! Epoch-validated query result cache
//!
//! Keyed by a digest of (collection, metric, k, ef, filter descriptor,
//! normalized query vector). Values carry the epoch they were computed
//! against; an epoch mismatch is a miss — no partial reuse, correctness over
//! cleverness. Eviction is LRU.

use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::{SearchHit, SearchRequest};
use crate::config::Metric;

/// Digest key for one (query, parameters) pair
pub type CacheKey = [u8; 32];

struct CachedEntry {
    epoch: u64,
    hits: Vec<SearchHit>,
}

/// Per-collection query cache
///
/// `LruCache` needs exclusive access even for reads (to update recency), so
/// the whole cache sits behind a `Mutex`.
pub struct QueryCache {
    entries: Mutex<LruCache<CacheKey, CachedEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Hit/miss counters for introspection
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl QueryCache {
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Build the digest key for a request
    ///
    /// The query vector must already be normalized when the metric is
    /// cosine, so equivalent queries share an entry.
    pub fn key(
        collection: &str,
        metric: Metric,
        request: &SearchRequest,
        query: &[f32],
    ) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(collection.as_bytes());
        hasher.update([0u8]);
        hasher.update(metric.as_str().as_bytes());
        hasher.update(request.k.to_le_bytes());
        hasher.update(request.ef.unwrap_or(0).to_le_bytes());
        if let Some(filter) = &request.filter {
            hasher.update(filter.descriptor().as_bytes());
        }
        hasher.update([0u8]);
        for value in query {
            hasher.update(value.to_le_bytes());
        }
        hasher.finalize().into()
    }

    /// Return the cached result when its epoch matches the current one
    pub fn lookup(&self, key: &CacheKey, current_epoch: u64) -> Option<Vec<SearchHit>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.epoch == current_epoch => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.hits.clone())
            }
            Some(_) => {
                // Stale epoch: drop the entry so it cannot be revalidated.
                entries.pop(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn store(&self, key: CacheKey, epoch: u64, hits: Vec<SearchHit>) {
        self.entries.lock().put(key, CachedEntry { epoch, hits });
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.lock().len(),
        }
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
