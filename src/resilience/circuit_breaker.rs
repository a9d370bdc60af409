//! Per-provider circuit breaker.
//!
//! State transitions happen under a mutex held for O(1) work; the wrapped
//! call runs outside the mutex so a slow upstream never serializes other
//! callers. From OPEN, the first call after `recovery_timeout` becomes the
//! single HALF_OPEN probe; concurrent calls short-circuit until the probe
//! resolves. A probe abandoned by cancellation releases its slot without
//! counting as success or failure.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::CircuitBreakerSettings;
use crate::error::GatewayError;
use crate::metrics::Metrics;
use crate::resilience::clock::{Clock, MonotonicClock};

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn label(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn gauge_value(self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Duration>,
    probe_in_flight: bool,
}

/// Point-in-time view of a breaker, for the HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub provider: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_since_last_failure: Option<f64>,
    pub probe_in_flight: bool,
}

/// Circuit breaker for one upstream. Shared across callers by `Arc`.
pub struct CircuitBreaker {
    provider: String,
    config: CircuitBreakerSettings,
    inner: Mutex<BreakerInner>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("provider", &self.provider)
            .field("config", &self.config)
            .finish()
    }
}

/// Releases the probe slot if the probing call is dropped before its
/// outcome is recorded.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.breaker.lock_inner();
            inner.probe_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new(
        provider: impl Into<String>,
        config: CircuitBreakerSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        let provider = provider.into();
        metrics.breaker_state.with_label_values(&[provider.as_str()]).set(CircuitState::Closed.gauge_value());
        info!(
            provider = %provider,
            failure_threshold = config.failure_threshold,
            recovery_timeout = config.recovery_timeout,
            "circuit breaker initialized"
        );
        Self {
            provider,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
                probe_in_flight: false,
            }),
            clock: Arc::new(MonotonicClock::default()),
            metrics,
        }
    }

    /// Replace the clock; used by tests to drive recovery deterministically.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &CircuitBreakerSettings {
        &self.config
    }

    fn lock_inner(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, inner: &mut BreakerInner, next: CircuitState) {
        inner.state = next;
        self.metrics.breaker_state.with_label_values(&[self.provider.as_str()]).set(next.gauge_value());
    }

    /// Decide whether this call may proceed. Returns whether the caller is
    /// the HALF_OPEN probe.
    fn admit(&self) -> Result<bool, GatewayError> {
        let mut inner = self.lock_inner();
        self.metrics
            .breaker_calls_total
            .with_label_values(&[self.provider.as_str(), inner.state.label()])
            .inc();

        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let since_failure = inner
                    .last_failure_at
                    .map(|at| self.clock.now().saturating_sub(at))
                    .unwrap_or(Duration::MAX);
                if since_failure >= self.config.recovery_timeout_duration() {
                    self.set_state(&mut inner, CircuitState::HalfOpen);
                    inner.probe_in_flight = true;
                    info!(provider = %self.provider, "circuit breaker half-open, probing recovery");
                    Ok(true)
                } else {
                    Err(GatewayError::CircuitOpen { provider: self.provider.clone() })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(GatewayError::CircuitOpen { provider: self.provider.clone() })
                } else {
                    // The previous probe was abandoned; this call takes over.
                    inner.probe_in_flight = true;
                    Ok(true)
                }
            }
        }
    }

    fn on_success(&self) {
        self.metrics.breaker_successes_total.with_label_values(&[self.provider.as_str()]).inc();
        let mut inner = self.lock_inner();
        match inner.state {
            CircuitState::HalfOpen => {
                self.set_state(&mut inner, CircuitState::Closed);
                inner.consecutive_failures = 0;
                inner.last_failure_at = None;
                inner.probe_in_flight = false;
                info!(provider = %self.provider, "circuit breaker recovered, closed");
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, error: &GatewayError) {
        self.metrics.breaker_failures_total.with_label_values(&[self.provider.as_str()]).inc();
        let mut inner = self.lock_inner();
        inner.consecutive_failures += 1;
        inner.last_failure_at = Some(self.clock.now());

        match inner.state {
            CircuitState::HalfOpen => {
                inner.probe_in_flight = false;
                self.set_state(&mut inner, CircuitState::Open);
                warn!(provider = %self.provider, error = %error, "recovery probe failed, reopening");
            }
            CircuitState::Closed => {
                warn!(
                    provider = %self.provider,
                    failures = inner.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    error = %error,
                    "circuit breaker recorded failure"
                );
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.set_state(&mut inner, CircuitState::Open);
                    warn!(
                        provider = %self.provider,
                        failures = inner.consecutive_failures,
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Run `op` under breaker protection. Every non-ok outcome counts
    /// toward the failure threshold.
    pub async fn call<T, Op, Fut>(&self, op: Op) -> Result<T, GatewayError>
    where
        T: Send,
        Op: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, GatewayError>> + Send,
    {
        let is_probe = self.admit()?;
        let mut guard = ProbeGuard { breaker: self, armed: is_probe };

        let result = op().await;
        guard.armed = false;

        match &result {
            Ok(_) => self.on_success(),
            Err(err) => self.on_failure(err),
        }
        result
    }

    pub fn state(&self) -> CircuitState {
        self.lock_inner().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock_inner();
        BreakerSnapshot {
            provider: self.provider.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout_seconds: self.config.recovery_timeout,
            seconds_since_last_failure: inner
                .last_failure_at
                .map(|at| self.clock.now().saturating_sub(at).as_secs_f64()),
            probe_in_flight: inner.probe_in_flight,
        }
    }
}
