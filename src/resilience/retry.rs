//! Retry layer: bounded exponential backoff with optional additive jitter.
//!
//! Wraps a single adapter call. Transient outcomes are re-attempted up to
//! `max_attempts`; fatal outcomes surface immediately. The wait before
//! attempt `n+1` is `min(max_wait, min_wait * exp_base^(n-1))` seconds,
//! plus a uniform extra in `[0, wait)` when jitter is enabled.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::RetrySettings;
use crate::error::GatewayError;
use crate::metrics::Metrics;
use crate::resilience::sleeper::{Sleeper, TokioSleeper};

/// Per-provider retry handler. Stateless between calls.
#[derive(Clone)]
pub struct RetryPolicy {
    provider: String,
    config: RetrySettings,
    sleeper: Arc<dyn Sleeper>,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("provider", &self.provider)
            .field("config", &self.config)
            .finish()
    }
}

impl RetryPolicy {
    pub fn new(provider: impl Into<String>, config: RetrySettings, metrics: Arc<Metrics>) -> Self {
        Self { provider: provider.into(), config, sleeper: Arc::new(TokioSleeper), metrics }
    }

    /// Swap the sleeper; used by tests to record backoff without waiting.
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn config(&self) -> &RetrySettings {
        &self.config
    }

    /// Backoff before the attempt after `attempt` (1-indexed) failed.
    fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let wait = self.config.min_wait * self.config.exp_base.powi(exponent);
        Duration::from_secs_f64(wait.min(self.config.max_wait))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.config.jitter || delay.is_zero() {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..delay.as_secs_f64());
        delay + Duration::from_secs_f64(extra)
    }

    /// Invoke `op` until it succeeds, fails fatally, or attempts run out.
    pub async fn execute<T, Op, Fut>(&self, mut op: Op) -> Result<T, GatewayError>
    where
        T: Send,
        Op: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, GatewayError>> + Send,
    {
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            self.metrics.retry_attempts_total.with_label_values(&[self.provider.as_str()]).inc();

            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(provider = %self.provider, attempt, "retry succeeded");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() => {
                    if attempt == max_attempts {
                        self.metrics.retry_exhausted_total.with_label_values(&[self.provider.as_str()]).inc();
                        warn!(
                            provider = %self.provider,
                            attempts = max_attempts,
                            error = %err,
                            "retries exhausted"
                        );
                        return Err(err);
                    }
                    let delay = self.jittered(self.base_delay(attempt));
                    debug!(
                        provider = %self.provider,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, backing off"
                    );
                    self.sleeper.sleep(delay).await;
                }
                Err(err) => {
                    debug!(provider = %self.provider, attempt, error = %err, "fatal failure, not retrying");
                    return Err(err);
                }
            }
        }

        Err(GatewayError::Internal { message: "retry loop exited without a result".into() })
    }
}
