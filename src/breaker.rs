//! Per-endpoint circuit breaker with timeout enforcement and half-open
//! recovery probing.

use crate::error::{KernelError, Result};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Circuit breaker state, exposed for diagnostics and the
/// `circuit_status` response metadata key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls are rejected immediately until the recovery timeout elapses.
    Open,
    /// Exactly one trial call is admitted.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Tunable parameters for one circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// Wait in the open state before admitting a probe call.
    pub recovery_timeout: Duration,
    /// Hard timeout applied to every protected call; a timeout counts as a
    /// failure.
    pub execution_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            execution_timeout: Duration::from_secs(15),
        }
    }
}

/// Diagnostics snapshot returned by [`CircuitBreaker::status`].
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    /// Breaker name, used in logs and `CircuitOpen` errors.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failure count.
    pub failure_count: u32,
    /// Seconds since the last recorded failure, if any.
    pub last_failure_age_secs: Option<f64>,
}

struct Inner {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    config: CircuitBreakerConfig,
    probe_in_flight: bool,
}

/// Thread-safe circuit breaker guarding one remote dependency.
///
/// State transitions: **Closed** -> (failures >= threshold) -> **Open** ->
/// (recovery timeout elapsed) -> **HalfOpen** -> (probe succeeds) ->
/// **Closed** (or probe fails -> back to **Open**).
///
/// The state mutex is held only for transitions; the protected call runs
/// outside the lock.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
    /// Create a named breaker with the given configuration.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: Arc::from(name.into()),
            inner: Arc::new(Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
                config,
                probe_in_flight: false,
            })),
        }
    }

    /// The breaker's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state snapshot. The open-to-half-open transition happens
    /// lazily inside [`call`](Self::call), not here.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Diagnostics snapshot: `{name, state, failure_count, last_failure}`.
    pub fn status(&self) -> BreakerStatus {
        let inner = self.inner.lock().unwrap();
        BreakerStatus {
            name: self.name.to_string(),
            state: inner.state,
            failure_count: inner.failures,
            last_failure_age_secs: inner.last_failure.map(|t| t.elapsed().as_secs_f64()),
        }
    }

    /// Execute `f` through the breaker under the configured execution
    /// timeout.
    ///
    /// Returns [`KernelError::CircuitOpen`] immediately while the breaker is
    /// open. After the recovery timeout the next call transitions to
    /// half-open and runs as the single admitted probe; concurrent callers
    /// during the probe are rejected until it completes. A timeout maps to
    /// [`KernelError::Timeout`] and counts as a failure.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let is_probe;
        let execution_timeout;

        // 1. Check state
        {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                CircuitState::Open => {
                    let recovered = inner
                        .last_failure
                        .map(|last| last.elapsed() >= inner.config.recovery_timeout)
                        .unwrap_or(false);
                    if recovered {
                        inner.state = CircuitState::HalfOpen;
                        tracing::info!(breaker = %self.name, "Circuit half-open, admitting probe");
                    } else {
                        return Err(KernelError::CircuitOpen(self.name.to_string()));
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.probe_in_flight {
                        return Err(KernelError::CircuitOpen(self.name.to_string()));
                    }
                }
                CircuitState::Closed => {}
            }
            is_probe = inner.state == CircuitState::HalfOpen;
            if is_probe {
                inner.probe_in_flight = true;
            }
            execution_timeout = inner.config.execution_timeout;
        }

        // 2. Execute outside the lock
        let result = match tokio::time::timeout(execution_timeout, f()).await {
            Ok(res) => res,
            Err(_) => Err(KernelError::Timeout),
        };

        // 3. Update state
        let mut inner = self.inner.lock().unwrap();
        match result {
            Ok(val) => {
                if is_probe {
                    inner.probe_in_flight = false;
                    tracing::info!(breaker = %self.name, "Probe succeeded, circuit closed");
                }
                inner.state = CircuitState::Closed;
                inner.failures = 0;
                Ok(val)
            }
            Err(e) => {
                if is_probe {
                    inner.probe_in_flight = false;
                }
                inner.failures += 1;
                inner.last_failure = Some(Instant::now());

                if is_probe
                    || (inner.state == CircuitState::Closed
                        && inner.failures >= inner.config.failure_threshold)
                {
                    inner.state = CircuitState::Open;
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.failures,
                        error = %e,
                        "Circuit opened"
                    );
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: Duration::from_millis(200),
            execution_timeout: Duration::from_millis(500),
        }
    }

    async fn fail(cb: &CircuitBreaker) -> Result<()> {
        cb.call(|| async { Err::<(), _>(KernelError::ToolFailed("boom".into())) })
            .await
    }

    #[tokio::test]
    async fn opens_after_threshold_and_rejects_without_invoking() {
        let cb = CircuitBreaker::new("test", fast_config(2));
        let invoked = Arc::new(AtomicU32::new(0));

        assert!(fail(&cb).await.is_err()); // 1
        assert!(fail(&cb).await.is_err()); // 2 -> Open
        assert_eq!(cb.state(), CircuitState::Open);

        let invoked_clone = invoked.clone();
        let res = cb
            .call(|| async move {
                invoked_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(KernelError::CircuitOpen(_))));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn half_open_probe_success_closes_and_zeroes_failures() {
        let cb = CircuitBreaker::new("test", fast_config(1));
        assert!(fail(&cb).await.is_err());
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(250)).await;

        let res = cb.call(|| async { Ok(()) }).await;
        assert!(res.is_ok());
        let status = cb.status();
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 0);
    }

    #[tokio::test]
    async fn half_open_probe_failure_reopens() {
        let cb = CircuitBreaker::new("test", fast_config(1));
        assert!(fail(&cb).await.is_err());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(fail(&cb).await.is_err()); // probe fails
        assert_eq!(cb.state(), CircuitState::Open);

        // Timer was reset by the failed probe, so the next call is rejected.
        let res = cb.call(|| async { Ok(()) }).await;
        assert!(matches!(res, Err(KernelError::CircuitOpen(_))));
    }

    #[tokio::test]
    async fn half_open_admits_single_probe() {
        let cb = CircuitBreaker::new("test", fast_config(1));
        assert!(fail(&cb).await.is_err());

        tokio::time::sleep(Duration::from_millis(250)).await;

        let started = Arc::new(AtomicU32::new(0));
        let cb_probe = cb.clone();
        let started_probe = started.clone();
        let probe = tokio::spawn(async move {
            cb_probe
                .call(|| async move {
                    started_probe.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, KernelError>(())
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;

        // Concurrent call during the probe fails fast.
        let second = cb.call(|| async { Ok::<_, KernelError>(()) }).await;
        assert!(matches!(second, Err(KernelError::CircuitOpen(_))));

        assert!(probe.await.unwrap().is_ok());
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(30),
            execution_timeout: Duration::from_millis(50),
        };
        let cb = CircuitBreaker::new("slow", config);

        let res = cb
            .call(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(KernelError::Timeout)));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let cb = CircuitBreaker::new("test", fast_config(3));
        assert!(fail(&cb).await.is_err());
        assert!(fail(&cb).await.is_err());
        assert!(cb.call(|| async { Ok(()) }).await.is_ok());
        assert_eq!(cb.status().failure_count, 0);

        // Two more failures must not open a threshold-3 breaker.
        assert!(fail(&cb).await.is_err());
        assert!(fail(&cb).await.is_err());
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
