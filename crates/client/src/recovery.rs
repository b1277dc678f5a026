//! Layered recovery over a failed call.
//!
//! One failed action runs through an ordered list of named strategies; the
//! first success wins and the rest are skipped. Nothing is swallowed: if
//! every configured strategy is exhausted the last classification comes back.
//!
//! Order of attempts:
//! 1. token refresh + single replay (authentication failures only)
//! 2. cache fallback (degraded success)
//! 3. offline enqueue (network failures only; reported as accepted-not-done)
//! 4. auto-retry with backoff
//! 5. user-intervention prompt, then one more retry round

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::classify::{classify, ErrorClassification, ErrorKind};
use crate::queue::QueueError;
use crate::resilience::RetryStrategy;
use crate::time::{Clock, SystemClock};
use crate::transport::{TransportError, TransportResponse};

/// The original failing call, replayable by any strategy.
pub type RecoveryAction =
    Arc<dyn Fn() -> BoxFuture<'static, Result<TransportResponse, TransportError>> + Send + Sync>;

/// Token refresh callback; reports whether a new token was obtained.
pub type RefreshTokenFn = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

/// Cache lookup by logical request key.
pub type CacheLookupFn = Arc<dyn Fn(&str) -> Option<Value> + Send + Sync>;

/// Hands the failed operation to the offline queue, returning the item id.
pub type EnqueueFn = Arc<dyn Fn() -> Result<String, QueueError> + Send + Sync>;

/// Asks the user whether the call should be retried.
pub type PromptFn = Arc<dyn Fn(ErrorClassification) -> BoxFuture<'static, bool> + Send + Sync>;

/// Result of a recovery run.
#[derive(Debug, Clone)]
pub struct RecoveryOutcome {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<ErrorClassification>,
    /// Set when the operation was accepted into the offline queue; the
    /// caller must treat this as pending, not completed.
    pub queued_item: Option<String>,
}

impl RecoveryOutcome {
    fn succeeded(data: Value) -> Self {
        Self { success: true, data: Some(data), error: None, queued_item: None }
    }

    fn queued(item_id: String, payload: Option<Value>) -> Self {
        Self { success: true, data: payload, error: None, queued_item: Some(item_id) }
    }

    fn failed(classification: ErrorClassification) -> Self {
        Self { success: false, data: None, error: Some(classification), queued_item: None }
    }
}

/// Which strategies are available for one recovery run.
#[derive(Clone, Default)]
pub struct RecoveryOptions {
    pub auto_retry: bool,
    pub refresh_token: Option<RefreshTokenFn>,
    pub cache_lookup: Option<CacheLookupFn>,
    pub cache_key: Option<String>,
    pub enqueue: Option<EnqueueFn>,
    pub prompt: Option<PromptFn>,
    /// Placeholder data reported alongside a queued outcome.
    pub queued_payload: Option<Value>,
}

impl fmt::Debug for RecoveryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryOptions")
            .field("auto_retry", &self.auto_retry)
            .field("refresh_token", &self.refresh_token.is_some())
            .field("cache_lookup", &self.cache_lookup.is_some())
            .field("cache_key", &self.cache_key)
            .field("enqueue", &self.enqueue.is_some())
            .field("prompt", &self.prompt.is_some())
            .finish()
    }
}

impl RecoveryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_retry(mut self, enabled: bool) -> Self {
        self.auto_retry = enabled;
        self
    }

    pub fn with_refresh_token(mut self, refresh: RefreshTokenFn) -> Self {
        self.refresh_token = Some(refresh);
        self
    }

    pub fn with_cache(mut self, lookup: CacheLookupFn, key: impl Into<String>) -> Self {
        self.cache_lookup = Some(lookup);
        self.cache_key = Some(key.into());
        self
    }

    pub fn with_enqueue(mut self, enqueue: EnqueueFn) -> Self {
        self.enqueue = Some(enqueue);
        self
    }

    pub fn with_prompt(mut self, prompt: PromptFn) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn with_queued_payload(mut self, payload: Value) -> Self {
        self.queued_payload = Some(payload);
        self
    }
}

/// Evaluates the recovery strategies in order.
pub struct RecoveryPipeline<C: Clock = SystemClock> {
    retry: RetryStrategy<C>,
}

impl<C: Clock> Clone for RecoveryPipeline<C> {
    fn clone(&self) -> Self {
        Self { retry: self.retry.clone() }
    }
}

impl<C: Clock> fmt::Debug for RecoveryPipeline<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryPipeline").field("retry", &self.retry).finish()
    }
}

impl Default for RecoveryPipeline<SystemClock> {
    fn default() -> Self {
        Self { retry: RetryStrategy::default() }
    }
}

impl<C: Clock> RecoveryPipeline<C> {
    /// Build a pipeline whose auto-retry strategy is `retry`.
    pub fn new(retry: RetryStrategy<C>) -> Self {
        Self { retry }
    }

    /// Run the strategy chain for a failure already classified as
    /// `classification`. First success short-circuits the rest.
    pub async fn combined_recovery(
        &self,
        action: &RecoveryAction,
        classification: &ErrorClassification,
        options: &RecoveryOptions,
    ) -> RecoveryOutcome {
        let mut last = classification.clone();

        // Token refresh: authentication failures get exactly one
        // refresh-and-replay before anything else is tried.
        if classification.kind == ErrorKind::Authentication {
            if let Some(refresh) = &options.refresh_token {
                info!("recovery: refreshing token");
                if refresh().await {
                    match action().await {
                        Ok(response) => {
                            info!("recovery: replay after refresh succeeded");
                            return RecoveryOutcome::succeeded(response.body);
                        }
                        Err(error) => {
                            warn!(error = %error, "recovery: replay after refresh failed");
                            last = classify(&error);
                        }
                    }
                } else {
                    warn!("recovery: token refresh failed");
                }
            }
        }

        // Cache fallback: degraded success from the last known-good value.
        if let (Some(lookup), Some(key)) = (&options.cache_lookup, &options.cache_key) {
            if let Some(value) = lookup(key) {
                info!(key = %key, "recovery: serving cached response");
                return RecoveryOutcome::succeeded(value);
            }
            debug!(key = %key, "recovery: no cached response");
        }

        // Offline enqueue: connection-level failures can wait for
        // connectivity instead of failing outright.
        if last.kind == ErrorKind::Network {
            if let Some(enqueue) = &options.enqueue {
                match enqueue() {
                    Ok(item_id) => {
                        info!(item = %item_id, "recovery: operation queued for later");
                        return RecoveryOutcome::queued(item_id, options.queued_payload.clone());
                    }
                    Err(error) => {
                        warn!(error = %error, "recovery: enqueue failed");
                    }
                }
            }
        }

        // Auto-retry with backoff, independent of the earlier strategies.
        if options.auto_retry {
            debug!("recovery: auto-retry");
            let replay = Arc::clone(action);
            match self.retry.execute(move || replay()).await {
                Ok(response) => return RecoveryOutcome::succeeded(response.body),
                Err(error) => {
                    warn!(error = %error, "recovery: auto-retry exhausted");
                    last = classify(&error);
                }
            }
        }

        // Last resort: ask the user.
        if let Some(prompt) = &options.prompt {
            if prompt(last.clone()).await {
                info!("recovery: user requested retry");
                let replay = Arc::clone(action);
                match self.retry.execute(move || replay()).await {
                    Ok(response) => return RecoveryOutcome::succeeded(response.body),
                    Err(error) => {
                        warn!(error = %error, "recovery: user-requested retry failed");
                        last = classify(&error);
                    }
                }
            } else {
                debug!("recovery: user declined retry");
            }
        }

        RecoveryOutcome::failed(last)
    }
}
