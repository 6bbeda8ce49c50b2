//! Usage counter storage backends.
//!
//! The tracker never holds counters itself; it asks a `UsageStore` to
//! run a read-modify-write against one provider's counter. Each backend
//! locks per provider, so unrelated providers never contend.

use dashmap::DashMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::storage;
use crate::types::{UsageCounter, VicinityError};

/// Keyed storage for per-provider usage counters.
pub trait UsageStore: Send + Sync {
    /// Atomically apply `mutate` to the provider's counter, creating it
    /// with `init` first if absent. Returns the counter after mutation.
    fn update(
        &self,
        provider: &str,
        init: &dyn Fn() -> UsageCounter,
        mutate: &mut dyn FnMut(&mut UsageCounter),
    ) -> UsageCounter;

    /// Copy of every stored counter.
    fn snapshot(&self) -> HashMap<String, UsageCounter>;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Process-lifetime counters.
#[derive(Debug, Default)]
pub struct MemoryUsageStore {
    counters: DashMap<String, UsageCounter>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: HashMap<String, UsageCounter>) -> Self {
        Self {
            counters: snapshot.into_iter().collect(),
        }
    }
}

impl UsageStore for MemoryUsageStore {
    fn update(
        &self,
        provider: &str,
        init: &dyn Fn() -> UsageCounter,
        mutate: &mut dyn FnMut(&mut UsageCounter),
    ) -> UsageCounter {
        // The entry guard holds the shard lock for this provider only.
        let mut entry = self
            .counters
            .entry(provider.to_string())
            .or_insert_with(|| init());
        mutate(entry.value_mut());
        entry.value().clone()
    }

    fn snapshot(&self) -> HashMap<String, UsageCounter> {
        self.counters
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// File-backed
// ---------------------------------------------------------------------------

/// In-memory counters saved to a JSON file on demand.
///
/// Updates only mark the store dirty; `flush` writes the snapshot. The
/// service flushes on every cache sweep and at shutdown, and a dirty
/// store flushes once more when dropped. Losing a snapshot only means
/// counters restart lower after a crash.
pub struct FileUsageStore {
    inner: MemoryUsageStore,
    path: PathBuf,
    dirty: AtomicBool,
    write_lock: Mutex<()>,
}

impl FileUsageStore {
    /// Open the store, loading any existing snapshot. A corrupt file is
    /// reported and replaced on the next write.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let snapshot = match storage::load_json::<HashMap<String, UsageCounter>>(&path) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable usage snapshot");
                HashMap::new()
            }
        };
        debug!(path = %path.display(), providers = snapshot.len(), "Usage store opened");

        Self {
            inner: MemoryUsageStore::from_snapshot(snapshot),
            path,
            dirty: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when counters changed since the last successful write.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Write the counters to disk if they changed. Returns whether a
    /// snapshot was written.
    pub fn flush(&self) -> Result<bool, VicinityError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }

        // Snapshot after clearing the flag: a concurrent update either
        // lands in this snapshot or marks the store dirty again.
        if let Err(e) = storage::save_json(&self.inner.snapshot(), &self.path) {
            self.dirty.store(true, Ordering::Release);
            return Err(VicinityError::Storage {
                path: self.path.display().to_string(),
                message: format!("{e:#}"),
            });
        }
        Ok(true)
    }
}

impl UsageStore for FileUsageStore {
    fn update(
        &self,
        provider: &str,
        init: &dyn Fn() -> UsageCounter,
        mutate: &mut dyn FnMut(&mut UsageCounter),
    ) -> UsageCounter {
        let mut changed = false;
        let counter = self.inner.update(provider, init, &mut |c| {
            let before = c.clone();
            mutate(c);
            changed |= *c != before;
        });

        if changed {
            self.dirty.store(true, Ordering::Release);
        }
        counter
    }

    fn snapshot(&self) -> HashMap<String, UsageCounter> {
        self.inner.snapshot()
    }
}

impl Drop for FileUsageStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, "Failed to persist usage counters on close");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
