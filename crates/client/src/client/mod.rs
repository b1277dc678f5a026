//! The unified client façade.
//!
//! Composes the circuit breaker, retry strategy, offline queue, response
//! cache, and recovery pipeline behind one `request()` surface with verb
//! sugar. Live calls go breaker → retry → transport; queue replays go to the
//! transport directly since the queue carries its own attempt bookkeeping.

pub mod cache;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

pub use cache::ResponseCache;

use crate::classify::{classify, ErrorClassification, ErrorKind, Severity};
use crate::queue::{
    KeyValueStore, OfflineQueue, QueueConfig, QueueError, QueueItem, QueueStats, SubscriptionId,
};
use crate::recovery::{
    CacheLookupFn, EnqueueFn, PromptFn, RecoveryAction, RecoveryOptions, RecoveryPipeline,
    RefreshTokenFn,
};
use crate::resilience::{
    idempotency_key, BreakerConfig, BreakerError, BreakerMetrics, CircuitBreaker, ConfigError,
    RetryConfig, RetryStrategy,
};
use crate::time::{Clock, SystemClock};
use crate::transport::{Method, Transport, TransportError, TransportRequest};

/// Failure constructing a client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Client tuning. Immutable after construction.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Default per-call deadline, overridable per request.
    pub base_timeout: Duration,
    /// Headers attached to every request.
    pub default_headers: HashMap<String, String>,
    pub breaker: BreakerConfig,
    pub retry: RetryConfig,
    pub queue: QueueConfig,
    /// How long successful GET bodies stay usable for cache fallback.
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_secs(30),
            default_headers: HashMap::new(),
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
            queue: QueueConfig::default(),
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 128,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.breaker.validate()?;
        self.retry.validate()?;
        self.queue.validate()?;
        if self.base_timeout.is_zero() {
            return Err(ConfigError::invalid("base_timeout must be greater than 0"));
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::invalid("cache_capacity must be greater than 0"));
        }
        Ok(())
    }
}

/// Per-request options.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub method: Method,
    pub payload: Option<Value>,
    pub headers: HashMap<String, String>,
    pub timeout: Option<Duration>,
    pub priority: crate::queue::Priority,
    pub conflict_policy: crate::queue::ConflictPolicy,
    /// Queue immediately instead of calling the transport while offline.
    pub require_online: bool,
}

impl RequestConfig {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            payload: None,
            headers: HashMap::new(),
            timeout: None,
            priority: crate::queue::Priority::default(),
            conflict_policy: crate::queue::ConflictPolicy::default(),
            require_online: false,
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

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_priority(mut self, priority: crate::queue::Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_conflict_policy(mut self, policy: crate::queue::ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn require_online(mut self) -> Self {
        self.require_online = true;
        self
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self::new(Method::Get)
    }
}

/// Final result of a request: completed, queued for later, or failed.
///
/// `Queued` is deliberately distinct from both success and failure so a UI
/// can show a pending state instead of an error.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    Completed {
        /// Transport status, absent for degraded (cache-served) results.
        status: Option<u16>,
        data: Value,
    },
    Queued {
        item_id: String,
        data: Option<Value>,
    },
    Failed {
        classification: ErrorClassification,
    },
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RequestOutcome::Completed { .. })
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, RequestOutcome::Queued { .. })
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            RequestOutcome::Completed { data, .. } => Some(data),
            RequestOutcome::Queued { data, .. } => data.as_ref(),
            RequestOutcome::Failed { .. } => None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            RequestOutcome::Completed { status, .. } => *status,
            RequestOutcome::Queued { .. } => None,
            RequestOutcome::Failed { classification } => classification.status_code,
        }
    }

    /// Display-ready message for failures.
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            RequestOutcome::Failed { classification } => Some(classification.user_message),
            _ => None,
        }
    }
}

fn cache_key(method: Method, endpoint: &str) -> String {
    format!("{method} {endpoint}")
}

/// Façade composing breaker → retry → transport with recovery and queueing.
///
/// Clones share all underlying state.
pub struct UnifiedClient<C: Clock = SystemClock> {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    breaker: CircuitBreaker<C>,
    retry: RetryStrategy<C>,
    pipeline: RecoveryPipeline<C>,
    queue: OfflineQueue<C>,
    cache: Arc<ResponseCache<C>>,
    clock: Arc<C>,
    refresh_token: Option<RefreshTokenFn>,
    prompt: Option<PromptFn>,
}

impl<C: Clock> Clone for UnifiedClient<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            transport: Arc::clone(&self.transport),
            breaker: self.breaker.clone(),
            retry: self.retry.clone(),
            pipeline: self.pipeline.clone(),
            queue: self.queue.clone(),
            cache: Arc::clone(&self.cache),
            clock: Arc::clone(&self.clock),
            refresh_token: self.refresh_token.clone(),
            prompt: self.prompt.clone(),
        }
    }
}

impl UnifiedClient<SystemClock> {
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, ClientError> {
        Self::with_clock(config, transport, store, SystemClock)
    }
}

impl<C: Clock + Clone> UnifiedClient<C> {
    pub fn with_clock(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KeyValueStore>,
        clock: C,
    ) -> Result<Self, ClientError> {
        config.validate()?;

        let breaker = CircuitBreaker::with_clock(config.breaker.clone(), clock.clone())?;
        let retry = RetryStrategy::with_clock(config.retry.clone(), clock.clone())?;
        let pipeline = RecoveryPipeline::new(retry.clone());
        let queue = OfflineQueue::with_clock(
            config.queue.clone(),
            Arc::clone(&transport),
            store,
            clock.clone(),
        )?;
        let cache = Arc::new(ResponseCache::with_clock(
            config.cache_ttl,
            config.cache_capacity,
            clock.clone(),
        ));

        Ok(Self {
            config,
            transport,
            breaker,
            retry,
            pipeline,
            queue,
            cache,
            clock: Arc::new(clock),
            refresh_token: None,
            prompt: None,
        })
    }
}

impl<C: Clock> UnifiedClient<C> {
    /// Wire the token refresh callback used by authentication recovery.
    pub fn with_refresh_token(mut self, refresh: RefreshTokenFn) -> Self {
        self.refresh_token = Some(refresh);
        self
    }

    /// Wire the user-intervention prompt used as recovery of last resort.
    pub fn with_prompt(mut self, prompt: PromptFn) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub async fn get(&self, endpoint: &str) -> RequestOutcome {
        self.request(endpoint, RequestConfig::new(Method::Get)).await
    }

    pub async fn post(&self, endpoint: &str, payload: Value) -> RequestOutcome {
        self.request(endpoint, RequestConfig::new(Method::Post).with_payload(payload)).await
    }

    pub async fn put(&self, endpoint: &str, payload: Value) -> RequestOutcome {
        self.request(endpoint, RequestConfig::new(Method::Put).with_payload(payload)).await
    }

    pub async fn patch(&self, endpoint: &str, payload: Value) -> RequestOutcome {
        self.request(endpoint, RequestConfig::new(Method::Patch).with_payload(payload)).await
    }

    pub async fn delete(&self, endpoint: &str) -> RequestOutcome {
        self.request(endpoint, RequestConfig::new(Method::Delete)).await
    }

    /// Execute one request through the full resilience stack.
    #[instrument(skip(self, config), fields(endpoint = %endpoint, method = %config.method))]
    pub async fn request(&self, endpoint: &str, config: RequestConfig) -> RequestOutcome {
        if config.require_online && !self.queue.is_online() {
            return self.enqueue_for_later(endpoint, &config);
        }

        let request = self.build_request(endpoint, &config);
        let retry = self.retry.clone();
        let transport = Arc::clone(&self.transport);
        let live_request = request.clone();

        let result = self
            .breaker
            .execute(move || async move {
                retry
                    .execute(move || {
                        let transport = Arc::clone(&transport);
                        let request = live_request.clone();
                        async move { transport.call(&request).await }
                    })
                    .await
            })
            .await;

        match result {
            Ok(response) => {
                if config.method == Method::Get {
                    self.cache.insert(&cache_key(config.method, endpoint), response.body.clone());
                }
                debug!(status = response.status, "request completed");
                RequestOutcome::Completed { status: Some(response.status), data: response.body }
            }
            Err(BreakerError::Open) => {
                warn!("request rejected by open circuit breaker");
                RequestOutcome::Failed { classification: ErrorClassification::breaker_open() }
            }
            Err(BreakerError::Call(error)) => self.recover(endpoint, &config, request, error).await,
        }
    }

    async fn recover(
        &self,
        endpoint: &str,
        config: &RequestConfig,
        request: TransportRequest,
        error: TransportError,
    ) -> RequestOutcome {
        let classification = classify(&error);
        if !classification.recoverable() {
            debug!(kind = ?classification.kind, "failure surfaced without recovery");
            return RequestOutcome::Failed { classification };
        }

        let action: RecoveryAction = {
            let transport = Arc::clone(&self.transport);
            Arc::new(move || {
                let transport = Arc::clone(&transport);
                let request = request.clone();
                async move { transport.call(&request).await }.boxed()
            })
        };

        let mut options = RecoveryOptions::new().with_auto_retry(true);
        if config.method == Method::Get {
            let cache = Arc::clone(&self.cache);
            let lookup: CacheLookupFn = Arc::new(move |key: &str| cache.get(key));
            options = options.with_cache(lookup, cache_key(config.method, endpoint));
        }
        {
            let queue = self.queue.clone();
            let item = self.queue_item_for(endpoint, config);
            let enqueue: EnqueueFn = Arc::new(move || queue.enqueue(item.clone()));
            options = options.with_enqueue(enqueue);
        }
        if let Some(refresh) = &self.refresh_token {
            options = options.with_refresh_token(Arc::clone(refresh));
        }
        if let Some(prompt) = &self.prompt {
            options = options.with_prompt(Arc::clone(prompt));
        }

        let outcome = self.pipeline.combined_recovery(&action, &classification, &options).await;

        if let Some(item_id) = outcome.queued_item {
            return RequestOutcome::Queued { item_id, data: outcome.data };
        }
        if outcome.success {
            return RequestOutcome::Completed {
                status: None,
                data: outcome.data.unwrap_or(Value::Null),
            };
        }
        RequestOutcome::Failed { classification: outcome.error.unwrap_or(classification) }
    }

    fn enqueue_for_later(&self, endpoint: &str, config: &RequestConfig) -> RequestOutcome {
        let item = self.queue_item_for(endpoint, config);
        match self.queue.enqueue(item) {
            Ok(item_id) => {
                info!(item = %item_id, "offline; request queued for later");
                RequestOutcome::Queued { item_id, data: None }
            }
            Err(error) => {
                warn!(error = %error, "failed to queue offline request");
                RequestOutcome::Failed {
                    classification: ErrorClassification::new(
                        ErrorKind::Unknown,
                        false,
                        Severity::Medium,
                    ),
                }
            }
        }
    }

    fn build_request(&self, endpoint: &str, config: &RequestConfig) -> TransportRequest {
        let mut headers = self.config.default_headers.clone();
        headers.extend(config.headers.clone());
        // Mutating requests carry a stable key so the server can deduplicate
        // replays of the same logical operation across retries.
        if config.method != Method::Get {
            headers.insert(
                "x-idempotency-key".to_string(),
                idempotency_key(endpoint, config.payload.as_ref(), self.clock.epoch_millis()),
            );
        }
        TransportRequest {
            endpoint: endpoint.to_string(),
            method: config.method,
            headers,
            body: config.payload.clone(),
            timeout: config.timeout.unwrap_or(self.config.base_timeout),
        }
    }

    fn queue_item_for(&self, endpoint: &str, config: &RequestConfig) -> QueueItem {
        let mut headers = self.config.default_headers.clone();
        headers.extend(config.headers.clone());
        // Stamped once at enqueue time so every replay reuses the same key.
        if config.method != Method::Get {
            headers.insert(
                "x-idempotency-key".to_string(),
                idempotency_key(endpoint, config.payload.as_ref(), self.clock.epoch_millis()),
            );
        }
        let mut item = QueueItem::new(endpoint, config.method)
            .with_priority(config.priority)
            .with_conflict_policy(config.conflict_policy);
        item.headers = headers;
        item.payload = config.payload.clone();
        item
    }

    /// Flip connectivity for the client and its queue. Coming online drains
    /// the backlog.
    pub fn set_online(&self, online: bool) {
        self.queue.set_online(online);
    }

    pub fn is_online(&self) -> bool {
        self.queue.is_online()
    }

    /// Breaker health snapshot.
    pub fn metrics(&self) -> BreakerMetrics {
        self.breaker.metrics()
    }

    pub fn is_healthy(&self) -> bool {
        self.breaker.is_healthy()
    }

    /// Queue statistics snapshot.
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Subscribe to queue statistics; fired after every queue mutation.
    pub fn subscribe_queue(
        &self,
        listener: impl Fn(QueueStats) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.queue.subscribe(listener)
    }

    pub fn unsubscribe_queue(&self, id: SubscriptionId) -> bool {
        self.queue.unsubscribe(id)
    }

    /// Manually drain the offline queue.
    pub async fn process_queue(&self) {
        self.queue.process_queue().await;
    }

    /// Start a passive breaker health probe hitting `endpoint` every
    /// `interval` while the circuit is open.
    pub fn start_health_probe(&self, interval: Duration, endpoint: impl Into<String>) {
        let transport = Arc::clone(&self.transport);
        let endpoint = endpoint.into();
        let timeout = self.config.base_timeout;
        self.breaker.start_health_probe(interval, move || {
            let transport = Arc::clone(&transport);
            let request = TransportRequest::new(endpoint.clone(), Method::Get)
                .with_timeout(timeout);
            async move { transport.call(&request).await.is_ok() }
        });
    }

    /// Stop all background work: the breaker probe and the queue drain task.
    pub fn destroy(&self) {
        self.breaker.stop_health_probe();
        self.queue.destroy();
        info!("client destroyed");
    }
}

impl<C: Clock> std::fmt::Debug for UnifiedClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnifiedClient")
            .field("breaker", &self.breaker.state())
            .field("online", &self.is_online())
            .finish()
    }
}
