//! Resilient request execution for Ridgeline clients.
//!
//! Sits between application callers and a remote HTTP-style service and
//! coordinates when to call through, when to fail fast, when to retry, when
//! to persist for later, and how to classify and recover from failure:
//!
//! - **`resilience::circuit_breaker`**: per-client health state machine
//!   (CLOSED/OPEN/HALF_OPEN) with a failure window and passive health probing
//! - **`resilience::retry`**: backoff strategies, jitter, network-quality
//!   scaling, retry budgets, and idempotency keys
//! - **`queue`**: durable, priority-ordered offline queue over a pluggable
//!   key-value store, drained on a timer and on reconnect
//! - **`classify`**: pure failure classification with stable user messages
//! - **`recovery`**: ordered fallback strategies over a failed call
//! - **`client`**: the [`UnifiedClient`] façade wiring all of the above
//!
//! Transport, persistence, token refresh, and user prompts are injected
//! ([`transport::Transport`], [`queue::KeyValueStore`], callback types in
//! [`recovery`]), so every component runs deterministically in tests via
//! [`time::MockClock`].

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod classify;
pub mod client;
pub mod queue;
pub mod recovery;
pub mod resilience;
pub mod time;
pub mod transport;

// Re-export the surface most callers need.
pub use classify::{classify, ErrorClassification, ErrorKind, Severity};
pub use client::{
    ClientConfig, ClientError, RequestConfig, RequestOutcome, ResponseCache, UnifiedClient,
};
pub use queue::{
    ConflictPolicy, FileStore, KeyValueStore, MemoryStore, OfflineQueue, Priority, QueueConfig,
    QueueError, QueueItem, QueueStats, SubscriptionId,
};
pub use recovery::{RecoveryOptions, RecoveryOutcome, RecoveryPipeline};
pub use resilience::{
    idempotency_key, Backoff, BreakerConfig, BreakerError, BreakerMetrics, CircuitBreaker,
    CircuitState, ConfigError, NetworkQuality, RetryConfig, RetryContext, RetryStrategy,
};
pub use time::{Clock, MockClock, SystemClock};
pub use transport::{
    HttpTransport, Method, Transport, TransportError, TransportRequest, TransportResponse,
};
