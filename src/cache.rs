//! In-process TTL key-value cache.
//!
//! Backs the verification-code service: codes live under
//! `auth:code:email:<id>` and send-locks under `auth:lock:email:<id>`.
//! Entries expire passively on access; the LRU bound keeps the map from
//! growing without limit.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Bounded TTL cache for short-lived strings.
pub struct TtlCache {
    cache: Mutex<LruCache<String, CacheEntry>>,
}

impl TtlCache {
    /// Create a cache holding at most `capacity` live entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap()),
            )),
        }
    }

    /// Get a value if present and not expired.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut cache = self.cache.lock().ok()?;
        if let Some(entry) = cache.get(key) {
            if entry.expires_at > Instant::now() {
                return Some(entry.value.clone());
            }
            cache.pop(key);
        }
        None
    }

    /// Store a value with a TTL, replacing any existing entry.
    pub fn set(&self, key: &str, value: &str, ttl: Duration) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                key.to_string(),
                CacheEntry {
                    value: value.to_string(),
                    expires_at: Instant::now() + ttl,
                },
            );
        }
    }

    /// Store a value only if the key is absent (or expired).
    ///
    /// Returns `true` when the value was stored. Non-blocking; this is the
    /// send-lock primitive.
    pub fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> bool {
        let Ok(mut cache) = self.cache.lock() else {
            return false;
        };
        if let Some(entry) = cache.get(key) {
            if entry.expires_at > Instant::now() {
                return false;
            }
            cache.pop(key);
        }
        cache.put(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        true
    }

    /// Remove a key.
    pub fn delete(&self, key: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.pop(key);
        }
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new(16 * 1024)
    }
}
