//! Local token estimation.
//!
//! Vendors usually report exact usage; when they omit it the pipeline
//! falls back to a local estimate. Estimation is pluggable — the client
//! accepts any [`TokenEstimator`] — and best-effort, not a contract.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

/// Estimates the token count of a piece of text without calling a vendor.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> u32;
}

/// Character-ratio estimator: roughly one token per four characters.
#[derive(Debug, Clone)]
pub struct CharEstimator {
    chars_per_token: usize,
}

impl CharEstimator {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for CharEstimator {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenEstimator for CharEstimator {
    fn estimate(&self, text: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }
        let chars = text.chars().count();
        (chars.div_ceil(self.chars_per_token)).max(1) as u32
    }
}

/// Bounded memoizing wrapper around another estimator.
///
/// Identical input text always yields the identical count, and the cache
/// never holds more than the configured number of entries.
pub struct CachingEstimator<E> {
    inner: E,
    cache: Mutex<LruCache<u64, u32>>,
}

impl<E: TokenEstimator> CachingEstimator<E> {
    pub fn new(inner: E, max_size: usize) -> Self {
        let capacity = NonZeroUsize::new(max_size.max(1)).expect("max(1) is non-zero");
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().expect("estimator cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key(text: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        hasher.finish()
    }
}

impl<E: TokenEstimator> TokenEstimator for CachingEstimator<E> {
    fn estimate(&self, text: &str) -> u32 {
        let key = Self::key(text);
        let mut cache = self.cache.lock().expect("estimator cache poisoned");
        if let Some(&count) = cache.get(&key) {
            return count;
        }
        let count = self.inner.estimate(text);
        cache.put(key, count);
        count
    }
}
