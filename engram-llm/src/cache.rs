//! Embedding cache
//!
//! Makes Embed deterministic per text within a process lifetime: the same
//! content hashes to the same key and returns the same vector without a
//! second model round-trip. Capacity-bounded with FIFO eviction.

use engram_core::{ContentHash, EmbeddingVector};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

struct CacheInner {
    entries: HashMap<ContentHash, EmbeddingVector>,
    /// Insertion order for FIFO eviction
    order: VecDeque<ContentHash>,
}

/// Cache for embedding vectors keyed by content hash.
pub struct EmbeddingCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Snapshot of cache counters for stats reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

impl EmbeddingCache {
    /// Default capacity per the service contract.
    pub const DEFAULT_CAPACITY: usize = 1_000;

    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
            }),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a cached embedding, counting the hit or miss.
    pub fn get(&self, hash: &ContentHash) -> Option<EmbeddingVector> {
        let inner = self.inner.lock().expect("embedding cache poisoned");
        match inner.entries.get(hash) {
            Some(embedding) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(embedding.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert an embedding, evicting the oldest entry at capacity.
    pub fn insert(&self, hash: ContentHash, embedding: EmbeddingVector) {
        let mut inner = self.inner.lock().expect("embedding cache poisoned");
        if inner.entries.contains_key(&hash) {
            return;
        }
        while inner.entries.len() >= self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
        inner.entries.insert(hash, embedding);
        inner.order.push_back(hash);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("embedding cache poisoned");
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("embedding cache poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for EmbeddingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingCache")
            .field("capacity", &self.capacity)
            .field("current_size", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::compute_content_hash;

    fn embedding(seed: f32) -> EmbeddingVector {
        EmbeddingVector::new(vec![seed, seed + 1.0], "test".to_string())
    }

    #[test]
    fn test_insert_and_get() {
        let cache = EmbeddingCache::new(10);
        let hash = compute_content_hash(b"hello");
        cache.insert(hash, embedding(1.0));
        assert_eq!(cache.get(&hash).unwrap(), embedding(1.0));
    }

    #[test]
    fn test_miss_counted() {
        let cache = EmbeddingCache::new(10);
        let hash = compute_content_hash(b"absent");
        assert!(cache.get(&hash).is_none());
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[test]
    fn test_fifo_eviction() {
        let cache = EmbeddingCache::new(2);
        let first = compute_content_hash(b"first");
        let second = compute_content_hash(b"second");
        let third = compute_content_hash(b"third");

        cache.insert(first, embedding(1.0));
        cache.insert(second, embedding(2.0));
        cache.insert(third, embedding(3.0));

        // Oldest entry evicted first, regardless of access pattern
        assert!(cache.get(&first).is_none());
        assert!(cache.get(&second).is_some());
        assert!(cache.get(&third).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_duplicate_insert_is_noop() {
        let cache = EmbeddingCache::new(2);
        let hash = compute_content_hash(b"same");
        cache.insert(hash, embedding(1.0));
        cache.insert(hash, embedding(9.0));
        // First insert wins; embeddings are deterministic per text
        assert_eq!(cache.get(&hash).unwrap(), embedding(1.0));
        assert_eq!(cache.len(), 1);
    }
}
