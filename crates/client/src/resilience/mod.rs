//! Resilience primitives: circuit breaker and retry strategy.
//!
//! Both are pure coordination logic over an injected [`Clock`](crate::time::Clock);
//! neither knows anything about HTTP beyond the [`TransportError`](crate::transport::TransportError)
//! failure currency.

pub mod circuit_breaker;
pub mod retry;

use thiserror::Error;

pub use circuit_breaker::{
    BreakerConfig, BreakerConfigBuilder, BreakerError, BreakerMetrics, CircuitBreaker,
    CircuitState,
};
pub use retry::{
    idempotency_key, Backoff, NetworkQuality, RetryConfig, RetryConfigBuilder, RetryContext,
    RetryStrategy,
};

/// Construction-time validation failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid { message: message.into() }
    }
}
