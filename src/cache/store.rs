//! Cache storage backends.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::CacheEntry;
use crate::types::VicinityError;

/// Keyed storage behind an `ExpiringCache`.
///
/// Implementations must be safe to use from many tasks at once and must
/// not serialise unrelated keys behind one lock.
#[cfg_attr(test, mockall::automock)]
pub trait CacheStore<T: Clone + Send + Sync + 'static>: Send + Sync {
    fn get(&self, key: &str) -> Option<CacheEntry<T>>;

    /// Store an entry, replacing any previous one.
    /// Fails with `CapacityExceeded` when the store is full.
    fn insert(&self, key: &str, entry: CacheEntry<T>) -> Result<(), VicinityError>;

    /// Remove `key` only if its entry has expired at `now`.
    fn remove_if_expired(&self, key: &str, now: DateTime<Utc>) -> bool;

    /// Remove every entry expired at `now`; returns how many were removed.
    fn remove_expired(&self, now: DateTime<Utc>) -> usize;

    fn keys(&self) -> Vec<String>;

    fn len(&self) -> usize;
}

/// Concurrent in-memory store with an optional entry ceiling.
#[derive(Debug)]
pub struct MemoryCacheStore<T> {
    entries: DashMap<String, CacheEntry<T>>,
    /// Keys held or reserved; the ceiling is checked against this.
    held: AtomicUsize,
    max_entries: Option<usize>,
}

impl<T> MemoryCacheStore<T> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            held: AtomicUsize::new(0),
            max_entries: None,
        }
    }

    /// A store that rejects new keys once `max_entries` are held.
    /// Overwriting an existing key is always accepted.
    pub fn with_capacity_limit(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            held: AtomicUsize::new(0),
            max_entries: Some(max_entries),
        }
    }
}

impl<T> Default for MemoryCacheStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> CacheStore<T> for MemoryCacheStore<T> {
    fn get(&self, key: &str) -> Option<CacheEntry<T>> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    fn insert(&self, key: &str, entry: CacheEntry<T>) -> Result<(), VicinityError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut existing) => {
                existing.insert(entry);
            }
            Entry::Vacant(slot) => {
                // Reserve before inserting so concurrent new keys cannot
                // both pass the ceiling.
                let capacity = self.max_entries.unwrap_or(usize::MAX);
                self.held
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                        (held < capacity).then_some(held + 1)
                    })
                    .map_err(|_| VicinityError::CapacityExceeded { capacity })?;
                slot.insert(entry);
            }
        }
        Ok(())
    }

    fn remove_if_expired(&self, key: &str, now: DateTime<Utc>) -> bool {
        let removed = self.entries.remove_if(key, |_, e| e.is_expired(now)).is_some();
        if removed {
            self.held.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    fn remove_expired(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, e| {
            let keep = !e.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        self.held.fetch_sub(removed, Ordering::AcqRel);
        removed
    }

    fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
