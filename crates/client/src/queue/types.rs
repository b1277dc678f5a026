//! Queue data model: items, priorities, configuration, stats.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resilience::ConfigError;
use crate::transport::Method;

/// Processing priority. Lower discriminant dequeues first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Critical => write!(f, "critical"),
            Priority::High => write!(f, "high"),
            Priority::Normal => write!(f, "normal"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// Advisory hint for resolving duplicate server-side state when a queued
/// operation finally lands. Carried through untouched; the queue itself
/// never dedupes on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    Overwrite,
    Merge,
    Skip,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        ConflictPolicy::Overwrite
    }
}

fn default_max_attempts() -> u32 {
    5
}

/// One deferred operation.
///
/// Identity and timestamps are stamped by the queue at enqueue time;
/// defensive `serde` defaults let a restart tolerate partially-shaped
/// persisted entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    #[serde(default)]
    pub id: String,
    pub endpoint: String,
    pub method: Method,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub priority: Priority,
    /// Epoch millis at enqueue time.
    #[serde(default)]
    pub enqueued_at: u64,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

impl QueueItem {
    pub fn new(endpoint: impl Into<String>, method: Method) -> Self {
        Self {
            id: String::new(),
            endpoint: endpoint.into(),
            method,
            payload: None,
            headers: HashMap::new(),
            priority: Priority::default(),
            enqueued_at: 0,
            attempt: 0,
            max_attempts: default_max_attempts(),
            conflict_policy: ConflictPolicy::default(),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Whether this item has burned through its attempt allowance.
    pub fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Queue tuning. Immutable after construction.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Hard capacity; the lowest-priority oldest item is evicted beyond it.
    pub max_size: usize,
    /// Interval of the background drain while online.
    pub drain_interval: Duration,
    /// Deadline for each queued transport call.
    pub process_timeout: Duration,
    /// Persistence key in the backing store.
    pub storage_key: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 1_000,
            drain_interval: Duration::from_secs(30),
            process_timeout: Duration::from_secs(30),
            storage_key: "ridgeline.offline_queue".to_string(),
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::invalid("max_size must be greater than 0"));
        }
        if self.drain_interval.is_zero() {
            return Err(ConfigError::invalid("drain_interval must be greater than 0"));
        }
        if self.process_timeout.is_zero() {
            return Err(ConfigError::invalid("process_timeout must be greater than 0"));
        }
        if self.storage_key.is_empty() {
            return Err(ConfigError::invalid("storage_key must not be empty"));
        }
        Ok(())
    }
}

/// Snapshot pushed to subscribers after every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total_items: usize,
    pub pending_items: usize,
    pub processing_items: usize,
    /// Items that have failed at least once and are still queued.
    pub failed_items: usize,
    pub critical_items: usize,
    pub oldest_item_timestamp: Option<u64>,
}
