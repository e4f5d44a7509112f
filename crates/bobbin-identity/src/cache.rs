//! Time-bounded caches for resolved identities.
//!
//! Entries carry their own expiry. Reads treat an expired entry as absent but
//! leave it in place; it is overwritten by the next `set` for the same key or
//! dropped by [`TtlCache::clear`].

use dashmap::DashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

/// One cached value and the instant it stops being served.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// Cached value
    pub value: T,
    /// First instant at which the value is considered stale
    pub expires_at: Instant,
}

impl<T> CacheEntry<T> {
    /// True once `now` has reached the expiry instant.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Concurrent map with a fixed time-to-live per entry.
///
/// Uses tokio's clock, so tests running with a paused runtime can step
/// through expiry deterministically.
#[derive(Debug)]
pub struct TtlCache<K: Eq + Hash, V> {
    entries: DashMap<K, CacheEntry<V>>,
    ttl: Duration,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    /// Create an empty cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Configured time-to-live
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Value for `key`, if present and not expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.entries.get(key)?;
        if entry.is_expired(Instant::now()) {
            None
        } else {
            Some(entry.value.clone())
        }
    }

    /// Insert or replace the value for `key`, restarting its TTL.
    pub fn set(&self, key: K, value: V) {
        let now = Instant::now();
        // A TTL too large to represent means "never expires" in practice.
        let expires_at = now
            .checked_add(self.ttl)
            .unwrap_or_else(|| now + Duration::from_secs(100 * 365 * 24 * 60 * 60));
        self.entries.insert(key, CacheEntry { value, expires_at });
    }

    /// Drop the entry for `key`, returning it if it was still live.
    pub fn remove(&self, key: &K) -> Option<V> {
        let (_, entry) = self.entries.remove(key)?;
        (!entry.is_expired(Instant::now())).then_some(entry.value)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
