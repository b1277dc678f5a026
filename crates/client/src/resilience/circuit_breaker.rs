//! Per-endpoint-group circuit breaker.
//!
//! Guards whether calls are attempted at all. One instance runs for the
//! lifetime of a client: CLOSED while the dependency looks healthy, OPEN
//! after `failure_threshold` failures inside `failure_window`, HALF_OPEN
//! once `open_duration` has elapsed and a probe call is allowed through.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::ConfigError;
use crate::time::{Clock, SystemClock};
use crate::transport::TransportError;

/// Breaker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Failures surfaced by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum BreakerError {
    /// The breaker rejected the call without invoking the action.
    #[error("circuit breaker is open; request rejected")]
    Open,

    /// The action ran and failed; the original failure is preserved.
    #[error(transparent)]
    Call(#[from] TransportError),
}

/// Breaker tuning. Immutable after construction.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive-window failures in CLOSED before opening.
    pub failure_threshold: u32,
    /// Successes in HALF_OPEN before closing again.
    pub success_threshold: u32,
    /// How long OPEN rejects calls before allowing a probe.
    pub open_duration: Duration,
    /// CLOSED failures older than this are discarded.
    pub failure_window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_duration: Duration::from_secs(60),
            failure_window: Duration::from_secs(120),
        }
    }
}

impl BreakerConfig {
    pub fn builder() -> BreakerConfigBuilder {
        BreakerConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::invalid("success_threshold must be greater than 0"));
        }
        if self.open_duration.is_zero() {
            return Err(ConfigError::invalid("open_duration must be greater than 0"));
        }
        if self.failure_window.is_zero() {
            return Err(ConfigError::invalid("failure_window must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for [`BreakerConfig`].
#[derive(Debug, Default)]
pub struct BreakerConfigBuilder {
    config: Option<BreakerConfig>,
}

impl BreakerConfigBuilder {
    fn entry(&mut self) -> &mut BreakerConfig {
        self.config.get_or_insert_with(BreakerConfig::default)
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.entry().failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.entry().success_threshold = threshold;
        self
    }

    pub fn open_duration(mut self, duration: Duration) -> Self {
        self.entry().open_duration = duration;
        self
    }

    pub fn failure_window(mut self, window: Duration) -> Self {
        self.entry().failure_window = window;
        self
    }

    pub fn build(mut self) -> Result<BreakerConfig, ConfigError> {
        let config = self.entry().clone();
        config.validate()?;
        Ok(config)
    }
}

/// Point-in-time snapshot for monitoring.
#[derive(Debug, Clone)]
pub struct BreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_requests: u64,
    pub last_failure_at: Option<Instant>,
    pub last_success_at: Option<Instant>,
    pub state_entered_at: Instant,
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    total_requests: u64,
    last_failure_at: Option<Instant>,
    last_success_at: Option<Instant>,
    state_entered_at: Instant,
}

impl BreakerInner {
    /// Enter `state`, resetting counters as every transition requires.
    fn transition(&mut self, state: CircuitState, now: Instant) {
        self.state = state;
        self.state_entered_at = now;
        self.failure_count = 0;
        self.success_count = 0;
    }

    /// Drop CLOSED failures that fell out of the failure window.
    fn discard_stale_failures(&mut self, now: Instant, window: Duration) {
        if self.failure_count == 0 {
            return;
        }
        if let Some(last) = self.last_failure_at {
            if now.duration_since(last) >= window {
                debug!(discarded = self.failure_count, "failure window elapsed");
                self.failure_count = 0;
            }
        }
    }
}

/// Circuit breaker over a [`Clock`].
///
/// Clones share state, so one breaker can guard several call sites.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: BreakerConfig,
    inner: Arc<RwLock<BreakerInner>>,
    clock: Arc<C>,
    probe_shutdown: Arc<AtomicBool>,
    probe_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
            clock: Arc::clone(&self.clock),
            probe_shutdown: Arc::clone(&self.probe_shutdown),
            probe_handle: Arc::clone(&self.probe_handle),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    pub fn new(config: BreakerConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, SystemClock)
    }
}

impl Default for CircuitBreaker<SystemClock> {
    fn default() -> Self {
        // The default config always validates.
        match Self::new(BreakerConfig::default()) {
            Ok(breaker) => breaker,
            Err(_) => unreachable!("default breaker config is valid"),
        }
    }
}

impl<C: Clock> CircuitBreaker<C> {
    pub fn with_clock(config: BreakerConfig, clock: C) -> Result<Self, ConfigError> {
        config.validate()?;
        let now = clock.now();
        Ok(Self {
            config,
            inner: Arc::new(RwLock::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                total_requests: 0,
                last_failure_at: None,
                last_success_at: None,
                state_entered_at: now,
            })),
            clock: Arc::new(clock),
            probe_shutdown: Arc::new(AtomicBool::new(false)),
            probe_handle: Arc::new(Mutex::new(None)),
        })
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, BreakerInner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("breaker state lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, BreakerInner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("breaker state lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Whether a call may proceed right now, transitioning OPEN to HALF_OPEN
    /// once the open duration has elapsed.
    pub fn can_execute(&self) -> bool {
        let now = self.clock.now();
        let mut inner = self.write_inner();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if now.duration_since(inner.state_entered_at) >= self.config.open_duration {
                    inner.transition(CircuitState::HalfOpen, now);
                    info!("circuit breaker half-open; probing");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Run `action` under breaker protection.
    ///
    /// Fails fast with [`BreakerError::Open`] when the circuit rejects the
    /// call. Cancellations pass through without touching the failure or
    /// success accounting.
    #[instrument(skip(self, action), fields(state = %self.state()))]
    pub async fn execute<F, Fut, T>(&self, action: F) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        if !self.can_execute() {
            debug!("rejecting call while open");
            return Err(BreakerError::Open);
        }

        self.write_inner().total_requests += 1;

        match action().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(TransportError::Cancelled) => {
                debug!("call cancelled by caller; accounting unchanged");
                Err(BreakerError::Call(TransportError::Cancelled))
            }
            Err(error) => {
                self.record_failure();
                Err(BreakerError::Call(error))
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let now = self.clock.now();
        let mut inner = self.write_inner();
        inner.last_success_at = Some(now);

        match inner.state {
            CircuitState::Closed => {
                inner.discard_stale_failures(now, self.config.failure_window);
                inner.success_count = inner.success_count.saturating_add(1);
            }
            CircuitState::HalfOpen => {
                inner.success_count = inner.success_count.saturating_add(1);
                if inner.success_count >= self.config.success_threshold {
                    inner.transition(CircuitState::Closed, now);
                    info!("circuit breaker closed");
                }
            }
            CircuitState::Open => {
                warn!("success recorded while open; ignoring");
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.write_inner();

        match inner.state {
            CircuitState::Closed => {
                inner.discard_stale_failures(now, self.config.failure_window);
                inner.failure_count = inner.failure_count.saturating_add(1);
                inner.last_failure_at = Some(now);
                if inner.failure_count >= self.config.failure_threshold {
                    let failures = inner.failure_count;
                    inner.transition(CircuitState::Open, now);
                    warn!(failures, "circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                inner.last_failure_at = Some(now);
                inner.transition(CircuitState::Open, now);
                warn!("circuit breaker reopened from half-open");
            }
            CircuitState::Open => {
                inner.last_failure_at = Some(now);
            }
        }
    }

    /// Force the breaker from OPEN into HALF_OPEN without counter changes.
    ///
    /// Used by the passive health probe; a no-op in any other state.
    pub fn force_half_open(&self) {
        let now = self.clock.now();
        let mut inner = self.write_inner();
        if inner.state == CircuitState::Open {
            inner.transition(CircuitState::HalfOpen, now);
            info!("health probe succeeded; circuit breaker half-open");
        }
    }

    pub fn state(&self) -> CircuitState {
        self.read_inner().state
    }

    pub fn is_healthy(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    pub fn metrics(&self) -> BreakerMetrics {
        let inner = self.read_inner();
        BreakerMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_requests: inner.total_requests,
            last_failure_at: inner.last_failure_at,
            last_success_at: inner.last_success_at,
            state_entered_at: inner.state_entered_at,
        }
    }

    /// Reset to CLOSED with cleared counters.
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut inner = self.write_inner();
        inner.transition(CircuitState::Closed, now);
        inner.last_failure_at = None;
        info!("circuit breaker reset");
    }

    /// Start a background probe that checks dependency health while OPEN and
    /// forces HALF_OPEN on success, independent of real traffic.
    ///
    /// Replaces any previously running probe. Stopped by
    /// [`CircuitBreaker::stop_health_probe`].
    pub fn start_health_probe<F, Fut>(&self, interval: Duration, probe: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send,
    {
        self.stop_health_probe();
        self.probe_shutdown.store(false, Ordering::Release);

        let breaker = self.clone();
        let shutdown = Arc::clone(&self.probe_shutdown);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if shutdown.load(Ordering::Acquire) {
                    break;
                }
                if breaker.state() != CircuitState::Open {
                    continue;
                }
                if probe().await {
                    breaker.force_half_open();
                }
            }
        });

        if let Ok(mut slot) = self.probe_handle.lock() {
            *slot = Some(handle);
        }
    }

    /// Stop the background health probe, if one is running.
    pub fn stop_health_probe(&self) {
        self.probe_shutdown.store(true, Ordering::Release);
        if let Ok(mut slot) = self.probe_handle.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    use super::*;
    use crate::time::MockClock;

    fn breaker(config: BreakerConfig) -> (CircuitBreaker<MockClock>, MockClock) {
        let clock = MockClock::new();
        let breaker = CircuitBreaker::with_clock(config, clock.clone()).unwrap();
        (breaker, clock)
    }

    fn fast_config() -> BreakerConfig {
        BreakerConfig::builder()
            .failure_threshold(3)
            .success_threshold(2)
            .open_duration(Duration::from_secs(30))
            .failure_window(Duration::from_secs(60))
            .build()
            .unwrap()
    }

    #[test]
    fn config_validation_rejects_zero_thresholds() {
        assert!(BreakerConfig::builder().failure_threshold(0).build().is_err());
        assert!(BreakerConfig::builder().success_threshold(0).build().is_err());
        assert!(BreakerConfig::builder().open_duration(Duration::ZERO).build().is_err());
        assert!(BreakerConfig::builder().failure_window(Duration::ZERO).build().is_err());
        assert!(BreakerConfig::builder().build().is_ok());
    }

    #[test]
    fn opens_at_failure_threshold() {
        let (cb, _clock) = breaker(fast_config());

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
        assert!(!cb.is_healthy());
    }

    #[test]
    fn stale_failures_are_discarded() {
        let (cb, clock) = breaker(fast_config());

        cb.record_failure();
        cb.record_failure();

        // Past the failure window, old failures no longer count.
        clock.advance(Duration::from_secs(61));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().failure_count, 1);
    }

    #[test]
    fn success_clears_window_expired_failures() {
        let (cb, clock) = breaker(fast_config());

        cb.record_failure();
        cb.record_failure();
        clock.advance(Duration::from_secs(61));
        cb.record_success();

        assert_eq!(cb.metrics().failure_count, 0);
    }

    #[test]
    fn open_transitions_to_half_open_after_duration() {
        let (cb, clock) = breaker(fast_config());

        for _ in 0..3 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(29));
        assert!(!cb.can_execute());

        clock.advance(Duration::from_secs(2));
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let (cb, clock) = breaker(fast_config());

        for _ in 0..3 {
            cb.record_failure();
        }
        clock.advance(Duration::from_secs(31));
        assert!(cb.can_execute());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        // The open duration restarts from the half-open failure.
        clock.advance(Duration::from_secs(29));
        assert!(!cb.can_execute());
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let (cb, clock) = breaker(fast_config());

        for _ in 0..3 {
            cb.record_failure();
        }
        clock.advance(Duration::from_secs(31));
        assert!(cb.can_execute());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().failure_count, 0);
        assert_eq!(cb.metrics().success_count, 0);
    }

    #[tokio::test]
    async fn execute_fails_fast_without_invoking_action() {
        let (cb, _clock) = breaker(fast_config());
        for _ in 0..3 {
            cb.record_failure();
        }

        let invoked = Arc::new(AtomicU32::new(0));
        let invoked_clone = Arc::clone(&invoked);
        let result: Result<(), _> = cb
            .execute(|| async move {
                invoked_clone.fetch_add(1, AtomicOrdering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Open)));
        assert_eq!(invoked.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn execute_records_outcomes() {
        let (cb, _clock) = breaker(fast_config());

        let ok = cb.execute(|| async { Ok(42u32) }).await;
        assert_eq!(ok.unwrap(), 42);

        let err = cb
            .execute(|| async {
                Err::<u32, _>(TransportError::connection("connection refused"))
            })
            .await;
        assert!(matches!(err, Err(BreakerError::Call(_))));

        let metrics = cb.metrics();
        assert_eq!(metrics.failure_count, 1);
        assert_eq!(metrics.total_requests, 2);
    }

    #[tokio::test]
    async fn cancellation_does_not_count_as_failure() {
        let (cb, _clock) = breaker(fast_config());

        let result = cb.execute(|| async { Err::<u32, _>(TransportError::Cancelled) }).await;
        assert!(matches!(result, Err(BreakerError::Call(TransportError::Cancelled))));
        assert_eq!(cb.metrics().failure_count, 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn force_half_open_only_applies_while_open() {
        let (cb, _clock) = breaker(fast_config());

        cb.force_half_open();
        assert_eq!(cb.state(), CircuitState::Closed);

        for _ in 0..3 {
            cb.record_failure();
        }
        cb.force_half_open();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn reset_returns_to_closed() {
        let (cb, _clock) = breaker(fast_config());
        for _ in 0..3 {
            cb.record_failure();
        }

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().failure_count, 0);
        assert!(cb.metrics().last_failure_at.is_none());
    }

    #[tokio::test]
    async fn health_probe_forces_half_open() {
        let (cb, _clock) = breaker(fast_config());
        for _ in 0..3 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);

        cb.start_health_probe(Duration::from_millis(5), || async { true });
        tokio::time::sleep(Duration::from_millis(40)).await;
        cb.stop_health_probe();

        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // Probe transitions never touch the counters.
        assert_eq!(cb.metrics().failure_count, 0);
        assert_eq!(cb.metrics().success_count, 0);
    }

    #[test]
    fn clones_share_state() {
        let (cb, _clock) = breaker(fast_config());
        let other = cb.clone();

        cb.record_failure();
        assert_eq!(other.metrics().failure_count, 1);
    }
}
