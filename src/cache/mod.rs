//! Expiring cache with per-entry TTL.
//!
//! Reads evict entries that have expired; `evict_expired` sweeps the
//! whole key space for maintenance. Writes never fail from the caller's
//! point of view: if the store is full, expired entries are swept and
//! the write retried once, then dropped.

pub mod store;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use store::CacheStore;

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// A cached value with its write and expiry times.
///
/// Invariant: `expires_at > written_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub payload: T,
    pub written_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn new(payload: T, written_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            payload,
            written_at,
            expires_at: written_at + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn ttl(&self) -> Duration {
        self.expires_at - self.written_at
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.written_at
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

pub struct ExpiringCache<T: Clone + Send + Sync + 'static> {
    store: Arc<dyn CacheStore<T>>,
    clock: Arc<dyn Clock>,
}

impl<T: Clone + Send + Sync + 'static> ExpiringCache<T> {
    pub fn new(store: Arc<dyn CacheStore<T>>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Store `value` until `now + ttl`, overwriting any prior entry.
    /// A non-positive TTL stores nothing.
    pub fn set(&self, key: &str, value: T, ttl: Duration) {
        if ttl <= Duration::zero() {
            debug!(key, "Skipping cache write with non-positive TTL");
            return;
        }
        let entry = CacheEntry::new(value, self.clock.now(), ttl);

        match self.store.insert(key, entry.clone()) {
            Ok(()) => debug!(key, ttl_secs = ttl.num_seconds(), "Cached"),
            Err(first) => {
                let evicted = self.evict_expired();
                debug!(key, evicted, error = %first, "Cache write rejected, retrying after sweep");
                if let Err(e) = self.store.insert(key, entry) {
                    warn!(key, error = %e, "Cache write dropped");
                }
            }
        }
    }

    /// The value for `key`, or None if unknown or expired. Expired
    /// entries are evicted by the read.
    pub fn get(&self, key: &str) -> Option<T> {
        self.get_entry(key).map(|e| e.payload)
    }

    /// Like `get`, but keeps the write and expiry timestamps.
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry<T>> {
        let entry = self.store.get(key)?;
        let now = self.clock.now();
        if entry.is_expired(now) {
            // Only removes if still expired; a concurrent fresh write survives.
            self.store.remove_if_expired(key, now);
            debug!(key, "Cache entry expired");
            return None;
        }
        Some(entry)
    }

    /// Remove every expired entry. Safe to run alongside `get`/`set`.
    pub fn evict_expired(&self) -> usize {
        let removed = self.store.remove_expired(self.clock.now());
        if removed > 0 {
            info!(removed, remaining = self.store.len(), "Evicted expired cache entries");
        }
        removed
    }

    /// Keys currently held, expired or not.
    pub fn keys(&self) -> Vec<String> {
        self.store.keys()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
