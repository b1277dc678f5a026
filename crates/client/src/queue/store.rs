//! Pluggable persistence surface for the offline queue.
//!
//! The queue only needs string get/set/remove; anything key-value shaped can
//! back it. Snapshots are versioned JSON, decoded defensively: a malformed
//! entry is skipped with a warning rather than failing startup.

use std::collections::HashMap;
use std::io::ErrorKind as IoErrorKind;
use std::path::PathBuf;
use std::sync::RwLock;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::types::QueueItem;

const SNAPSHOT_VERSION: u32 = 1;

/// Storage failure. The queue logs these and keeps serving from memory.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Minimal key-value surface the queue persists through.
pub trait KeyValueStore: Send + Sync {
    /// Fetch a value. Missing or unreadable keys come back as `None`.
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory store; the default for tests and ephemeral clients.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.entries.read() {
            Ok(entries) => entries.get(key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(key).cloned(),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.remove(key);
        Ok(())
    }
}

/// File-per-key store under a directory, for clients that must survive a
/// process restart without a database.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let sanitized: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
            .collect();
        self.dir.join(format!("{sanitized}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(value) => Some(value),
            Err(e) if e.kind() == IoErrorKind::NotFound => None,
            Err(e) => {
                warn!(key, error = %e, "failed to read persisted value");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        std::fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Serialize the queue for persistence.
pub(crate) fn encode_snapshot(items: &[QueueItem]) -> Result<String, StoreError> {
    let items = serde_json::to_value(items)?;
    let snapshot = serde_json::json!({ "version": SNAPSHOT_VERSION, "items": items });
    Ok(snapshot.to_string())
}

/// Decode a persisted snapshot, dropping anything malformed.
///
/// Items missing a timestamp are stamped with `now_millis`; items missing an
/// id get a fresh one.
pub(crate) fn decode_snapshot(raw: &str, now_millis: u64) -> Vec<QueueItem> {
    let snapshot: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "discarding corrupt queue snapshot");
            return Vec::new();
        }
    };

    let Some(entries) = snapshot.get("items").and_then(Value::as_array) else {
        warn!("queue snapshot has no items array; discarding");
        return Vec::new();
    };

    let mut items = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<QueueItem>(entry.clone()) {
            Ok(mut item) => {
                if item.endpoint.is_empty() {
                    warn!("discarding persisted item without an endpoint");
                    continue;
                }
                if item.id.is_empty() {
                    item.id = Uuid::new_v4().to_string();
                }
                if item.enqueued_at == 0 {
                    item.enqueued_at = now_millis;
                }
                if item.max_attempts == 0 {
                    item.max_attempts = 1;
                }
                items.push(item);
            }
            Err(e) => {
                warn!(error = %e, "discarding malformed queue entry");
            }
        }
    }

    debug!(restored = items.len(), "decoded queue snapshot");
    items
}
