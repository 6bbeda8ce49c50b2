//! Persistence layer.
//!
//! Saves and loads JSON snapshots to/from disk. Used by the file-backed
//! usage store so quota counters survive restarts; the in-memory stores
//! never touch this module.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

/// Write a value as pretty JSON. The file is replaced via a temporary
/// sibling so a crash mid-write never leaves a truncated snapshot.
pub fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .context("Failed to serialise snapshot")?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json)
        .with_context(|| format!("Failed to write snapshot to {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move snapshot into {}", path.display()))?;

    debug!(path = %path.display(), bytes = json.len(), "Snapshot saved");
    Ok(())
}

/// Load a JSON snapshot.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        info!(path = %path.display(), "No saved snapshot found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot from {}", path.display()))?;

    let value = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse snapshot from {}", path.display()))?;

    info!(path = %path.display(), "Snapshot loaded from disk");
    Ok(Some(value))
}

/// Delete a snapshot file (for testing or reset).
pub fn delete_json(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to delete snapshot {}", path.display()))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
