//! Offline queue: durable, priority-ordered backlog of deferred operations.
//!
//! ## Submodules
//!
//! - **`types`**: items, priorities, configuration, stats snapshots
//! - **`store`**: the pluggable key-value persistence surface
//! - **`core`**: the queue itself (ordering, eviction, guarded drain, listeners)

pub mod core;
pub mod errors;
pub mod store;
pub mod types;

pub use self::core::{OfflineQueue, SubscriptionId};
pub use errors::{QueueError, QueueResult};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};
pub use types::{ConflictPolicy, Priority, QueueConfig, QueueItem, QueueStats};
