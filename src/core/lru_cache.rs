//! Bounded LRU cache for inference results, keyed by the raw input vector.
//!
//! Inputs can be large, so the key hash samples only the first, middle, and
//! last elements. Collisions are harmless: equality always compares every
//! element, the sampled hash just buys hot-path speed at the cost of
//! locality on pathological inputs.

use std::{
    num::NonZeroUsize,
    sync::atomic::{AtomicU64, Ordering},
};

use lru::LruCache;
use parking_lot::Mutex;

/// Cache key wrapping one input vector.
///
/// Equality is elementwise over the f32 bit patterns (NaN-safe and
/// reflexive); the hash mixes the sampled elements and is 0 for an empty
/// input.
#[derive(Debug, Clone)]
pub struct InputKey(Vec<f32>);

impl InputKey {
    pub fn new(input: Vec<f32>) -> Self {
        Self(input)
    }

    fn sampled_hash(&self) -> u64 {
        fn mix(hash: u64, value: f32) -> u64 {
            hash ^ u64::from(value.to_bits())
                .wrapping_add(0x9e37_79b9)
                .wrapping_add(hash << 6)
                .wrapping_add(hash >> 2)
        }

        if self.0.is_empty() {
            return 0;
        }
        let mut hash = 0u64;
        hash = mix(hash, self.0[0]);
        hash = mix(hash, self.0[self.0.len() / 2]);
        hash = mix(hash, self.0[self.0.len() - 1]);
        hash
    }
}

impl PartialEq for InputKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .zip(&other.0)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl Eq for InputKey {}

impl std::hash::Hash for InputKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u64(self.sampled_hash());
    }
}

/// Thread-safe bounded response cache with recency eviction.
#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<LruCache<InputKey, Vec<f32>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a key, promoting it to most-recently-used on a hit.
    pub fn get(&self, key: &InputKey) -> Option<Vec<f32>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or overwrite, promoting the entry and evicting the
    /// least-recently-used one when at capacity.
    pub fn put(&self, key: InputKey, value: Vec<f32>) {
        self.entries.lock().put(key, value);
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
