//! Queue error types.

use thiserror::Error;

use super::store::StoreError;
use crate::resilience::ConfigError;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("queue item not found: {0}")]
    ItemNotFound(String),

    #[error("queue is shutting down")]
    ShuttingDown,

    #[error("queue state lock poisoned: {0}")]
    Lock(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
