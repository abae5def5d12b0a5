//! Generic circuit breaker implementation.
//!
//! Three states:
//!
//! - **Closed** (initial): calls pass through; each failure increments the
//!   failure count, each success decays it by one. Reaching the failure
//!   threshold opens the breaker.
//! - **Open**: calls are rejected immediately until the open timeout
//!   elapses, then the breaker moves to half-open.
//! - **HalfOpen**: up to `half_open_max_calls` probe calls are allowed; a
//!   call beyond that limit is rejected. Enough successes close the
//!   breaker; any failure reopens it.
//!
//! A periodic monitoring tick decays counters while closed, preventing
//! stale failures from reappearing.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default consecutive-failure threshold before opening.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default open-state timeout in milliseconds.
pub const DEFAULT_OPEN_TIMEOUT_MS: u64 = 30_000;

/// Default number of probe calls allowed while half-open.
pub const DEFAULT_HALF_OPEN_MAX_CALLS: u32 = 4;

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls are rejected until the open timeout elapses.
    Open,
    /// A limited number of probe calls are allowed.
    HalfOpen,
}

impl CircuitState {
    /// Returns a string representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a call is rejected or the wrapped operation fails.
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The breaker is open; the wrapped operation was not invoked.
    #[error("circuit open, retry in {retry_after:?}")]
    Open {
        /// Time remaining until the breaker will allow a probe call.
        retry_after: Duration,
    },

    /// The breaker is half-open and its probe budget is spent.
    #[error("circuit half-open, probe limit reached")]
    ProbeLimit,

    /// The wrapped operation itself failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> CircuitError<E> {
    /// Returns true if the call was rejected without invoking the operation.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Open { .. } | Self::ProbeLimit)
    }
}

/// Configuration for a circuit breaker.
#[derive(Clone, Debug)]
pub struct BreakerConfig {
    /// Consecutive failures (less success decay) that open the breaker.
    pub failure_threshold: u32,

    /// How long the breaker stays open before allowing probes.
    pub open_timeout: Duration,

    /// Probe calls allowed while half-open.
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            open_timeout: Duration::from_millis(DEFAULT_OPEN_TIMEOUT_MS),
            half_open_max_calls: DEFAULT_HALF_OPEN_MAX_CALLS,
        }
    }
}

/// Cumulative call statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct BreakerStats {
    /// Calls that reached the wrapped operation.
    pub total_calls: u64,
    /// Wrapped operations that succeeded.
    pub total_successes: u64,
    /// Wrapped operations that failed.
    pub total_failures: u64,
    /// Calls rejected without invoking the operation.
    pub total_rejections: u64,
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    probes_in_flight: u32,
    next_attempt: Option<Instant>,
}

/// A protective state machine around an unreliable call path.
///
/// Shared via `Arc` between all workers; internal state is behind a short
/// critical section and is never held across an await.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    total_calls: AtomicU64,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Creates a closed breaker with the given configuration.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                probes_in_flight: 0,
                next_attempt: None,
            }),
            total_calls: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        }
    }

    /// Creates a breaker with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(BreakerConfig::default())
    }

    /// Executes an operation through the breaker.
    ///
    /// Returns `CircuitError::Open`/`ProbeLimit` without invoking the
    /// operation when the breaker is rejecting, `CircuitError::Inner` when
    /// the operation itself fails.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.admit()?;
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let result = op().await;

        match result {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(CircuitError::Inner(err))
            }
        }
    }

    /// Executes an operation through the breaker, routing rejections to a
    /// fallback.
    ///
    /// The fallback runs only when the breaker rejects the call; operation
    /// failures are still surfaced as `CircuitError::Inner`.
    pub async fn call_or_else<T, E, F, Fut, FB>(&self, op: F, fallback: FB) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce() -> T,
    {
        match self.call(op).await {
            Err(err) if err.is_rejection() => Ok(fallback()),
            other => other,
        }
    }

    /// Admission check: may transition Open -> HalfOpen on elapsed timeout.
    fn admit<E>(&self) -> Result<(), CircuitError<E>> {
        let mut inner = self.lock();
        let now = Instant::now();

        if inner.state == CircuitState::Open {
            match inner.next_attempt {
                Some(at) if now >= at => {
                    info!("Circuit breaker half-open, probing");
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    inner.probes_in_flight = 0;
                }
                Some(at) => {
                    self.total_rejections.fetch_add(1, Ordering::Relaxed);
                    return Err(CircuitError::Open {
                        retry_after: at.duration_since(now),
                    });
                }
                None => {
                    // Forced open: reject until forced closed.
                    self.total_rejections.fetch_add(1, Ordering::Relaxed);
                    return Err(CircuitError::Open {
                        retry_after: self.config.open_timeout,
                    });
                }
            }
        }

        if inner.state == CircuitState::HalfOpen {
            if inner.probes_in_flight >= self.config.half_open_max_calls {
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                return Err(CircuitError::ProbeLimit);
            }
            inner.probes_in_flight += 1;
        }

        Ok(())
    }

    fn on_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = inner.failure_count.saturating_sub(1);
            }
            CircuitState::HalfOpen => {
                inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
                inner.success_count += 1;
                let required = (self.config.half_open_max_calls / 2).max(1);
                if inner.success_count >= required {
                    info!("Circuit breaker closed after successful probes");
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.next_attempt = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    warn!(
                        failures = inner.failure_count,
                        timeout_ms = self.config.open_timeout.as_millis() as u64,
                        "Circuit breaker opened"
                    );
                    inner.state = CircuitState::Open;
                    inner.next_attempt = Some(Instant::now() + self.config.open_timeout);
                }
            }
            CircuitState::HalfOpen => {
                warn!("Circuit breaker reopened after failed probe");
                inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                inner.next_attempt = Some(Instant::now() + self.config.open_timeout);
            }
            CircuitState::Open => {}
        }
    }

    /// Periodic monitoring tick.
    ///
    /// While closed, decays the failure and success counters by one (floor
    /// zero) so that old failures do not linger and trip the breaker long
    /// after the dependency recovered. Driven by the coordinator's shared
    /// clock.
    pub fn monitor_tick(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::Closed {
            if inner.failure_count > 0 {
                inner.failure_count -= 1;
                debug!(
                    failure_count = inner.failure_count,
                    "Circuit breaker decayed failure count"
                );
            }
            inner.success_count = inner.success_count.saturating_sub(1);
        }
    }

    /// Forces the breaker open (operational override).
    ///
    /// The breaker stays open until [`force_close`](Self::force_close).
    pub fn force_open(&self) {
        let mut inner = self.lock();
        warn!("Circuit breaker forced open");
        inner.state = CircuitState::Open;
        inner.next_attempt = None;
    }

    /// Forces the breaker closed and resets counters (operational override).
    pub fn force_close(&self) {
        let mut inner = self.lock();
        info!("Circuit breaker forced closed");
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.probes_in_flight = 0;
        inner.next_attempt = None;
    }

    /// Returns the current state.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Returns cumulative call statistics.
    pub fn stats(&self) -> BreakerStats {
        BreakerStats {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // Inner state is private and no panic can occur while holding the
        // lock, so poisoning is unreachable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, timeout_ms: u64) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: threshold,
            open_timeout: Duration::from_millis(timeout_ms),
            half_open_max_calls: 4,
        }
    }

    async fn fail(breaker: &CircuitBreaker) {
        let _ = breaker
            .call(|| async { Err::<(), _>("boom") })
            .await;
    }

    async fn succeed(breaker: &CircuitBreaker) {
        let result = breaker.call(|| async { Ok::<_, &str>(42) }).await;
        assert!(matches!(result, Ok(42) | Err(_)));
    }

    #[tokio::test]
    async fn test_closed_passes_through() {
        let breaker = CircuitBreaker::with_defaults();
        let result = breaker.call(|| async { Ok::<_, &str>(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_opens_at_failure_threshold() {
        let breaker = CircuitBreaker::new(config(5, 60_000));

        for _ in 0..4 {
            fail(&breaker).await;
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_rejects_without_invoking() {
        let breaker = CircuitBreaker::new(config(1, 60_000));
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let invoked = std::sync::atomic::AtomicBool::new(false);
        let result = breaker
            .call(|| async {
                invoked.store(true, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;

        assert!(matches!(result, Err(CircuitError::Open { .. })));
        assert!(!invoked.load(Ordering::SeqCst));
        assert_eq!(breaker.stats().total_rejections, 1);
    }

    #[tokio::test]
    async fn test_half_open_after_timeout_and_closes_on_successes() {
        let breaker = CircuitBreaker::new(config(1, 20));
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;

        // First call after the timeout is allowed through as a probe.
        succeed(&breaker).await;
        // half_open_max_calls = 4 so 2 successes close the breaker.
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(config(1, 20));
        fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        fail(&breaker).await; // probe fails
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_success_decays_failure_count() {
        let breaker = CircuitBreaker::new(config(3, 60_000));
        fail(&breaker).await;
        fail(&breaker).await;
        succeed(&breaker).await; // decays one failure
        fail(&breaker).await;
        // 2 - 1 + 1 = 2 failures, threshold 3: still closed
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_monitor_tick_decays_while_closed() {
        let breaker = CircuitBreaker::new(config(3, 60_000));
        fail(&breaker).await;
        fail(&breaker).await;

        breaker.monitor_tick();
        breaker.monitor_tick();

        // Counters decayed to zero; threshold failures are needed again.
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_force_open_and_close() {
        let breaker = CircuitBreaker::with_defaults();
        breaker.force_open();
        assert_eq!(breaker.state(), CircuitState::Open);

        let result = breaker.call(|| async { Ok::<_, &str>(()) }).await;
        assert!(matches!(result, Err(CircuitError::Open { .. })));

        breaker.force_close();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.call(|| async { Ok::<_, &str>(()) }).await.is_ok());
    }

    #[tokio::test]
    async fn test_fallback_on_rejection() {
        let breaker = CircuitBreaker::new(config(1, 60_000));
        fail(&breaker).await;

        let result = breaker
            .call_or_else(|| async { Ok::<_, &str>(1) }, || 99)
            .await;
        assert_eq!(result.unwrap(), 99);
    }

    #[tokio::test]
    async fn test_fallback_not_used_for_inner_error() {
        let breaker = CircuitBreaker::with_defaults();
        let result = breaker
            .call_or_else(|| async { Err::<i32, _>("boom") }, || 99)
            .await;
        assert!(matches!(result, Err(CircuitError::Inner("boom"))));
    }

    #[tokio::test]
    async fn test_stats_accumulate() {
        let breaker = CircuitBreaker::new(config(2, 60_000));
        succeed(&breaker).await;
        fail(&breaker).await;
        fail(&breaker).await; // opens
        fail(&breaker).await; // rejected

        let stats = breaker.stats();
        assert_eq!(stats.total_calls, 3);
        assert_eq!(stats.total_successes, 1);
        assert_eq!(stats.total_failures, 2);
        assert_eq!(stats.total_rejections, 1);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitState::Closed.as_str(), "closed");
        assert_eq!(CircuitState::Open.as_str(), "open");
        assert_eq!(format!("{}", CircuitState::HalfOpen), "half-open");
    }
}
