//! Per-call retry strategy.
//!
//! Decides whether and when a single failed attempt is retried: backoff
//! shape, jitter, a network-quality multiplier, a wall-clock retry budget,
//! and a caller veto. Attempts for one logical call are strictly sequential.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::ConfigError;
use crate::time::{Clock, SystemClock};
use crate::transport::TransportError;

/// Exponent cap preventing overflow in exponential backoff.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Multiplicative jitter amplitude (plus or minus).
const JITTER_FACTOR: f64 = 0.1;

/// Idempotency keys are stable within this wall-clock bucket.
const IDEMPOTENCY_BUCKET_MILLIS: u64 = 60_000;

/// Shape of the delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// Always wait `base_delay`.
    Fixed,
    /// `base_delay * (attempt + 1)`, capped at `max_delay`.
    Linear,
    /// `base_delay * 2^attempt`, capped at `max_delay`.
    Exponential,
}

/// Observed connection quality, scaling all computed delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl NetworkQuality {
    pub fn multiplier(&self) -> f64 {
        match self {
            NetworkQuality::Excellent => 1.0,
            NetworkQuality::Good => 1.2,
            NetworkQuality::Fair => 1.5,
            NetworkQuality::Poor => 2.0,
        }
    }
}

/// Retry tuning. Immutable after construction.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub backoff: Backoff,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Additional attempts after the first, so `max_retries + 1` total.
    pub max_retries: u32,
    pub jitter: bool,
    pub quality: NetworkQuality,
    /// Wall-clock ceiling over all attempts of one logical call.
    pub budget: Option<Duration>,
    /// Status codes worth retrying.
    pub retryable_statuses: Vec<u16>,
    /// Lowercase substrings of connection failures worth retrying.
    pub retryable_signatures: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff: Backoff::Exponential,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_secs(30),
            max_retries: 3,
            jitter: true,
            quality: NetworkQuality::Excellent,
            budget: None,
            retryable_statuses: vec![408, 429, 500, 502, 503, 504],
            retryable_signatures: [
                "connection reset",
                "econnreset",
                "econnrefused",
                "connection refused",
                "broken pipe",
                "timed out",
                "timeout",
                "temporarily unavailable",
                "network",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl RetryConfig {
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay > self.max_delay {
            return Err(ConfigError::invalid("base_delay cannot exceed max_delay"));
        }
        if self.max_retries > 100 {
            return Err(ConfigError::invalid("max_retries cannot exceed 100"));
        }
        Ok(())
    }
}

/// Builder for [`RetryConfig`].
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: Option<RetryConfig>,
}

impl RetryConfigBuilder {
    fn entry(&mut self) -> &mut RetryConfig {
        self.config.get_or_insert_with(RetryConfig::default)
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.entry().backoff = backoff;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.entry().base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.entry().max_delay = delay;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.entry().max_retries = retries;
        self
    }

    pub fn jitter(mut self, enabled: bool) -> Self {
        self.entry().jitter = enabled;
        self
    }

    pub fn quality(mut self, quality: NetworkQuality) -> Self {
        self.entry().quality = quality;
        self
    }

    pub fn budget(mut self, budget: Duration) -> Self {
        self.entry().budget = Some(budget);
        self
    }

    pub fn retryable_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.entry().retryable_statuses = statuses;
        self
    }

    pub fn build(mut self) -> Result<RetryConfig, ConfigError> {
        let config = self.entry().clone();
        config.validate()?;
        Ok(config)
    }
}

/// Per-attempt bookkeeping handed to the caller veto. Never persisted.
#[derive(Debug, Clone, Copy)]
pub struct RetryContext {
    /// 1-based number of the attempt that just failed.
    pub attempt: u32,
    pub total_attempts: u32,
    pub computed_delay: Duration,
    pub elapsed_since_first_attempt: Duration,
}

/// Retry executor over a [`Clock`].
pub struct RetryStrategy<C: Clock = SystemClock> {
    config: RetryConfig,
    clock: Arc<C>,
}

impl<C: Clock> Clone for RetryStrategy<C> {
    fn clone(&self) -> Self {
        Self { config: self.config.clone(), clock: Arc::clone(&self.clock) }
    }
}

impl<C: Clock> std::fmt::Debug for RetryStrategy<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryStrategy").field("config", &self.config).finish()
    }
}

impl RetryStrategy<SystemClock> {
    pub fn new(config: RetryConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, SystemClock)
    }
}

impl Default for RetryStrategy<SystemClock> {
    fn default() -> Self {
        Self { config: RetryConfig::default(), clock: Arc::new(SystemClock) }
    }
}

impl<C: Clock> RetryStrategy<C> {
    pub fn with_clock(config: RetryConfig, clock: C) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, clock: Arc::new(clock) })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Whether the default policy considers `error` worth retrying.
    pub fn is_retryable(&self, error: &TransportError) -> bool {
        match error {
            TransportError::Cancelled => false,
            TransportError::Timeout { .. } => true,
            TransportError::Status { status, .. } => {
                self.config.retryable_statuses.contains(status)
            }
            TransportError::Connection { message } => {
                let lowered = message.to_lowercase();
                self.config.retryable_signatures.iter().any(|s| lowered.contains(s.as_str()))
            }
        }
    }

    /// Backoff delay for `attempt` (0-based) before jitter and quality scaling.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_millis() as u64;
        let max = self.config.max_delay.as_millis() as u64;
        let millis = match self.config.backoff {
            Backoff::None => 0,
            Backoff::Fixed => base,
            Backoff::Linear => base.saturating_mul(u64::from(attempt) + 1).min(max),
            Backoff::Exponential => {
                let multiplier = 2_u64.saturating_pow(attempt.min(MAX_BACKOFF_EXPONENT));
                base.saturating_mul(multiplier).min(max)
            }
        };
        Duration::from_millis(millis)
    }

    /// Final delay for `attempt`: backoff, then jitter, then quality scaling.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut millis = self.base_delay_for(attempt).as_millis() as f64;
        if self.config.jitter && millis > 0.0 {
            let swing = rand::thread_rng().gen_range(-JITTER_FACTOR..=JITTER_FACTOR);
            millis += millis * swing;
        }
        millis *= self.config.quality.multiplier();
        Duration::from_millis(millis.max(0.0) as u64)
    }

    /// Run `operation`, retrying retryable failures up to `max_retries`
    /// additional attempts. The last failure is always surfaced.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        self.execute_with(operation, |_, _| true).await
    }

    /// Like [`RetryStrategy::execute`], with a caller veto: the predicate can
    /// forbid a retry the default policy would allow (it cannot force one).
    pub async fn execute_with<F, Fut, T, V>(
        &self,
        mut operation: F,
        veto: V,
    ) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
        V: Fn(&TransportError, &RetryContext) -> bool,
    {
        let first_attempt_at = self.clock.now();
        let total_attempts = self.config.max_retries + 1;
        let mut attempt: u32 = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempts = attempt + 1, "call succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if attempt + 1 >= total_attempts {
                        debug!(attempts = attempt + 1, "retry attempts exhausted");
                        return Err(error);
                    }
                    if !self.is_retryable(&error) {
                        debug!(error = %error, "failure is not retryable");
                        return Err(error);
                    }

                    let elapsed = self.clock.now().duration_since(first_attempt_at);
                    let delay = self.delay_for(attempt);
                    let context = RetryContext {
                        attempt: attempt + 1,
                        total_attempts,
                        computed_delay: delay,
                        elapsed_since_first_attempt: elapsed,
                    };

                    if !veto(&error, &context) {
                        debug!(attempt = context.attempt, "retry vetoed by caller");
                        return Err(error);
                    }

                    if let Some(budget) = self.config.budget {
                        if elapsed >= budget || elapsed + delay > budget {
                            warn!(?elapsed, ?budget, "retry budget exceeded");
                            return Err(error);
                        }
                    }

                    warn!(
                        attempt = context.attempt,
                        total_attempts,
                        delay = ?delay,
                        error = %error,
                        "attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Stable key a transport can use to deduplicate server-side effects of
/// retried calls.
///
/// Pure: identical endpoint, payload, and wall-clock bucket (one minute)
/// always produce the same key.
pub fn idempotency_key(endpoint: &str, payload: Option<&Value>, epoch_millis: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(endpoint.as_bytes());
    if let Some(payload) = payload {
        hasher.update(payload.to_string().as_bytes());
    }
    hasher.update((epoch_millis / IDEMPOTENCY_BUCKET_MILLIS).to_be_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;

    use super::*;
    use crate::time::MockClock;

    fn strategy(config: RetryConfig) -> RetryStrategy<MockClock> {
        RetryStrategy::with_clock(config, MockClock::new()).unwrap()
    }

    fn exponential(base_millis: u64, max_retries: u32) -> RetryConfig {
        RetryConfig::builder()
            .backoff(Backoff::Exponential)
            .base_delay(Duration::from_millis(base_millis))
            .max_retries(max_retries)
            .jitter(false)
            .build()
            .unwrap()
    }

    #[test]
    fn config_validation() {
        let result = RetryConfig::builder()
            .base_delay(Duration::from_secs(60))
            .max_delay(Duration::from_secs(30))
            .build();
        assert!(result.is_err());

        assert!(RetryConfig::builder().max_retries(101).build().is_err());
        assert!(RetryConfig::builder().build().is_ok());
    }

    #[test]
    fn exponential_delays_double_per_attempt() {
        let strategy = strategy(exponential(100, 3));

        assert_eq!(strategy.delay_for(0), Duration::from_millis(100));
        assert_eq!(strategy.delay_for(1), Duration::from_millis(200));
        assert_eq!(strategy.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn linear_and_fixed_and_none_backoff() {
        let linear = strategy(
            RetryConfig::builder()
                .backoff(Backoff::Linear)
                .base_delay(Duration::from_millis(50))
                .jitter(false)
                .build()
                .unwrap(),
        );
        assert_eq!(linear.delay_for(0), Duration::from_millis(50));
        assert_eq!(linear.delay_for(2), Duration::from_millis(150));

        let fixed = strategy(
            RetryConfig::builder()
                .backoff(Backoff::Fixed)
                .base_delay(Duration::from_millis(75))
                .jitter(false)
                .build()
                .unwrap(),
        );
        assert_eq!(fixed.delay_for(5), Duration::from_millis(75));

        let none = strategy(
            RetryConfig::builder().backoff(Backoff::None).jitter(false).build().unwrap(),
        );
        assert_eq!(none.delay_for(0), Duration::ZERO);
    }

    #[test]
    fn delays_cap_at_max_delay() {
        let strategy = strategy(
            RetryConfig::builder()
                .backoff(Backoff::Exponential)
                .base_delay(Duration::from_millis(100))
                .max_delay(Duration::from_millis(250))
                .jitter(false)
                .build()
                .unwrap(),
        );

        assert_eq!(strategy.delay_for(10), Duration::from_millis(250));
    }

    #[test]
    fn jitter_varies_delays_within_ten_percent() {
        let strategy = strategy(
            RetryConfig::builder()
                .backoff(Backoff::Fixed)
                .base_delay(Duration::from_millis(1_000))
                .jitter(true)
                .build()
                .unwrap(),
        );

        let mut saw_variation = false;
        let mut previous = None;
        for _ in 0..16 {
            let delay = strategy.delay_for(0).as_millis() as i64;
            assert!((900..=1_100).contains(&delay), "delay {delay} outside jitter band");
            if previous.is_some() && previous != Some(delay) {
                saw_variation = true;
            }
            previous = Some(delay);
        }
        assert!(saw_variation, "jitter should vary the delay");
    }

    #[test]
    fn quality_multiplier_scales_final_delay() {
        let strategy = strategy(
            RetryConfig::builder()
                .backoff(Backoff::Fixed)
                .base_delay(Duration::from_millis(100))
                .jitter(false)
                .quality(NetworkQuality::Poor)
                .build()
                .unwrap(),
        );

        assert_eq!(strategy.delay_for(0), Duration::from_millis(200));
    }

    #[test]
    fn retryability_table() {
        let strategy = strategy(RetryConfig::default());

        let retryable = TransportError::Status { status: 503, message: String::new() };
        let terminal = TransportError::Status { status: 404, message: String::new() };
        assert!(strategy.is_retryable(&retryable));
        assert!(!strategy.is_retryable(&terminal));

        assert!(strategy.is_retryable(&TransportError::connection("ECONNRESET by peer")));
        assert!(!strategy.is_retryable(&TransportError::connection("certificate rejected")));
        assert!(strategy
            .is_retryable(&TransportError::Timeout { timeout: Duration::from_secs(1) }));
        assert!(!strategy.is_retryable(&TransportError::Cancelled));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let strategy = strategy(exponential(1, 4));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = strategy
            .execute(move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TransportError::Status { status: 503, message: String::new() })
                    } else {
                        Ok("recovered")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_failure_stops_after_first_attempt() {
        let strategy = strategy(exponential(1, 3));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<(), _> = strategy
            .execute(move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TransportError::Status { status: 400, message: String::new() })
                }
            })
            .await;

        assert!(matches!(result, Err(TransportError::Status { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_surfaces_last_failure() {
        let strategy = strategy(exponential(1, 2));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let statuses = [503u16, 502, 500];
        let result: Result<(), _> = strategy
            .execute(move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) as usize;
                    Err(TransportError::Status {
                        status: statuses[n.min(statuses.len() - 1)],
                        message: String::new(),
                    })
                }
            })
            .await;

        // Three attempts ran; the error from the last one comes back.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(result, Err(TransportError::Status { status: 500, .. })));
    }

    #[tokio::test]
    async fn caller_veto_stops_retries() {
        let strategy = strategy(exponential(1, 3));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<(), _> = strategy
            .execute_with(
                move || {
                    let calls = Arc::clone(&calls_clone);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(TransportError::Status { status: 503, message: String::new() })
                    }
                },
                |_, context| context.attempt < 2,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn budget_stops_retries_even_with_attempts_left() {
        let clock = MockClock::new();
        let config = RetryConfig::builder()
            .backoff(Backoff::None)
            .max_retries(10)
            .jitter(false)
            .budget(Duration::from_millis(500))
            .build()
            .unwrap();
        let strategy = RetryStrategy::with_clock(config, clock.clone()).unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        let budget_clock = clock.clone();

        let result: Result<(), _> = strategy
            .execute(move || {
                let calls = Arc::clone(&calls_clone);
                let clock = budget_clock.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    // Each attempt burns simulated wall-clock time.
                    clock.advance_millis(200);
                    Err(TransportError::Status { status: 503, message: String::new() })
                }
            })
            .await;

        assert!(result.is_err());
        // 200ms per attempt against a 500ms budget: attempts 1-3 run, then stop.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn idempotency_key_is_stable_within_a_bucket() {
        let payload = json!({ "name": "Rex", "age": 3 });
        let first = idempotency_key("/pets", Some(&payload), 120_000);
        let second = idempotency_key("/pets", Some(&payload), 150_000);
        assert_eq!(first, second, "same minute bucket must produce the same key");

        let next_bucket = idempotency_key("/pets", Some(&payload), 180_001);
        assert_ne!(first, next_bucket);

        let other_endpoint = idempotency_key("/matches", Some(&payload), 120_000);
        assert_ne!(first, other_endpoint);

        let no_payload = idempotency_key("/pets", None, 120_000);
        assert_ne!(first, no_payload);
    }
}
