use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::utils::error::{AppError, Result};

/// Per-backend fault-isolation state machine.
///
/// Wraps a single asynchronous operation and decides fail-fast vs. execute:
///
/// - **Closed**: normal operation, consecutive failures are counted.
/// - **Open**: calls fail fast until `recovery_timeout` has elapsed since the
///   last recorded failure, then the next call runs as a half-open trial.
/// - **HalfOpen**: calls run; `success_threshold` consecutive successes close
///   the circuit, any failure reopens it immediately.
///
/// State lives behind a plain mutex that is never held across an await. The
/// counters are eventually consistent under concurrent `execute` calls; a few
/// extra trial calls around the closed-to-open boundary are acceptable.
pub struct CircuitBreaker {
    backend_id: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a half-open trial is allowed.
    pub recovery_timeout: Duration,
    /// Informational observation window; not used by the state machine.
    pub monitoring_period: Duration,
    /// Consecutive half-open successes required to close the circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            monitoring_period: Duration::from_secs(60),
            success_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_at: Option<Instant>,
    times_opened: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure_at: None,
            times_opened: 0,
        }
    }
}

/// Raw counters exposed for observability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub times_opened: u64,
}

impl CircuitBreaker {
    pub fn new(backend_id: &str, config: CircuitBreakerConfig) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn with_defaults(backend_id: &str) -> Self {
        Self::new(backend_id, CircuitBreakerConfig::default())
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Runs `op` under fault isolation. The operation's own error is always
    /// rethrown after bookkeeping; the breaker only adds its fast-fail error
    /// when short-circuiting an open circuit.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.before_call()?;

        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(e)
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.lock();
        CircuitBreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            times_opened: inner.times_opened,
        }
    }

    /// Forces the circuit closed with all counters zeroed. Manual operator
    /// intervention; the lifetime open count is kept.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.last_failure_at = None;
        tracing::info!(backend = %self.backend_id, "circuit breaker manually reset");
    }

    fn before_call(&self) -> Result<()> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let recovered = inner
                    .last_failure_at
                    .map(|at| at.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(true);
                if recovered {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    tracing::info!(
                        backend = %self.backend_id,
                        "circuit breaker half-open, allowing trial call"
                    );
                    Ok(())
                } else {
                    Err(AppError::CircuitOpen {
                        backend: self.backend_id.clone(),
                    })
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    tracing::info!(backend = %self.backend_id, "circuit breaker closed (recovered)");
                }
            }
            // A success can land here when a trial call raced the reopen.
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                inner.last_failure_at = Some(Instant::now());
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.times_opened += 1;
                    tracing::warn!(
                        backend = %self.backend_id,
                        threshold = self.config.failure_threshold,
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                // Any failure during the trial window reopens immediately.
                inner.state = CircuitState::Open;
                inner.consecutive_failures = 0;
                inner.consecutive_successes = 0;
                inner.last_failure_at = Some(Instant::now());
                inner.times_opened += 1;
                tracing::warn!(
                    backend = %self.backend_id,
                    "circuit breaker reopened (failed while half-open)"
                );
            }
            CircuitState::Open => {
                inner.last_failure_at = Some(Instant::now());
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn test_config(failure_threshold: u32, recovery_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            recovery_timeout: Duration::from_millis(recovery_ms),
            monitoring_period: Duration::from_secs(60),
            success_threshold: 2,
        }
    }

    async fn fail(breaker: &CircuitBreaker) {
        let _ = breaker
            .execute(|| async {
                Err::<(), _>(AppError::Backend {
                    backend: "test".to_string(),
                    message: "boom".to_string(),
                })
            })
            .await;
    }

    async fn succeed(breaker: &CircuitBreaker) {
        breaker.execute(|| async { Ok(()) }).await.unwrap();
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(5)]
    #[tokio::test]
    async fn test_opens_after_exactly_threshold_failures(#[case] threshold: u32) {
        let breaker = CircuitBreaker::new("bigbox", test_config(threshold, 60_000));

        for i in 0..threshold {
            assert_eq!(breaker.state(), CircuitState::Closed, "failure {}", i);
            fail(&breaker).await;
        }

        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.snapshot().times_opened, 1);
    }

    #[tokio::test]
    async fn test_fast_fail_does_not_invoke_operation() {
        let breaker = CircuitBreaker::new("bigbox", test_config(1, 60_000));
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let invocations = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&invocations);
        let result = breaker
            .execute(|| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(AppError::CircuitOpen { .. })));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_resets_closed_failure_count() {
        let breaker = CircuitBreaker::new("bigbox", test_config(3, 60_000));

        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.snapshot().consecutive_failures, 2);

        succeed(&breaker).await;
        assert_eq!(breaker.snapshot().consecutive_failures, 0);

        // Two more failures must not open; the streak restarted.
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_recovery_timeout_allows_trial() {
        let breaker = CircuitBreaker::new("bigbox", test_config(1, 10));
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(25)).await;

        let invocations = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&invocations);
        let state_seen = Arc::new(Mutex::new(None));
        let state_slot = Arc::clone(&state_seen);
        let breaker_ref = &breaker;
        breaker
            .execute(|| {
                let counter = Arc::clone(&counter);
                let state_slot = Arc::clone(&state_slot);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    *state_slot.lock().unwrap() = Some(breaker_ref.state());
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        // The breaker was half-open while the trial ran.
        assert_eq!(*state_seen.lock().unwrap(), Some(CircuitState::HalfOpen));
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_immediately() {
        let breaker = CircuitBreaker::new("bigbox", test_config(1, 10));
        fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(25)).await;

        // One success in half-open, then a failure: straight back to open,
        // prior successes earn no partial credit.
        succeed(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.snapshot().consecutive_successes, 0);
    }

    #[tokio::test]
    async fn test_half_open_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new("bigbox", test_config(1, 10));
        fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(25)).await;

        succeed(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker).await;

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_underlying_error_is_rethrown() {
        let breaker = CircuitBreaker::with_defaults("bigbox");
        let result: Result<()> = breaker
            .execute(|| async {
                Err(AppError::Backend {
                    backend: "bigbox".to_string(),
                    message: "503".to_string(),
                })
            })
            .await;

        match result {
            Err(AppError::Backend { backend, message }) => {
                assert_eq!(backend, "bigbox");
                assert_eq!(message, "503");
            }
            other => panic!("expected the backend error back, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_reset_forces_closed() {
        let breaker = CircuitBreaker::new("bigbox", test_config(1, 60_000));
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.consecutive_successes, 0);
        succeed(&breaker).await;
    }
}
