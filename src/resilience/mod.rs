//! Resilience pipeline: per-provider circuit breaker wrapped around a
//! per-provider retry layer.
//!
//! Breakers and retry handlers are keyed by provider name and created
//! lazily from the current config snapshot. When a snapshot changes the
//! tuning for a provider, its handler is recreated (breaker state reset is
//! accepted); otherwise it survives reloads.

pub mod circuit_breaker;
pub mod clock;
pub mod retry;
pub mod sleeper;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

use crate::config::{CircuitBreakerSettings, ResilienceSettings, RetrySettings};
use crate::error::GatewayError;
use crate::metrics::Metrics;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use retry::RetryPolicy;

/// Named circuit breakers, persistent across config reloads.
pub struct BreakerRegistry {
    metrics: Arc<Metrics>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics, breakers: Mutex::new(HashMap::new()) }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fetch the breaker for `provider`, creating it (or recreating it on
    /// tuning change) from `config`.
    pub fn get(&self, provider: &str, config: &CircuitBreakerSettings) -> Arc<CircuitBreaker> {
        let mut breakers = self.lock();
        if let Some(existing) = breakers.get(provider) {
            if existing.config() == config {
                return existing.clone();
            }
            info!(provider, "circuit breaker tuning changed, recreating");
        }
        let breaker =
            Arc::new(CircuitBreaker::new(provider, config.clone(), self.metrics.clone()));
        breakers.insert(provider.to_string(), breaker.clone());
        breaker
    }

    /// Snapshots of every known breaker, sorted by provider name.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let breakers = self.lock();
        let mut entries: Vec<BreakerSnapshot> =
            breakers.values().map(|b| b.snapshot()).collect();
        entries.sort_by(|a, b| a.provider.cmp(&b.provider));
        entries
    }

    pub fn snapshot_for(&self, provider: &str) -> Option<BreakerSnapshot> {
        self.lock().get(provider).map(|b| b.snapshot())
    }
}

/// Named retry handlers, persistent across config reloads.
pub struct RetryRegistry {
    metrics: Arc<Metrics>,
    handlers: Mutex<HashMap<String, Arc<RetryPolicy>>>,
}

impl RetryRegistry {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics, handlers: Mutex::new(HashMap::new()) }
    }

    pub fn get(&self, provider: &str, config: &RetrySettings) -> Arc<RetryPolicy> {
        let mut handlers = self.handlers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = handlers.get(provider) {
            if existing.config() == config {
                return existing.clone();
            }
            info!(provider, "retry tuning changed, recreating handler");
        }
        let handler =
            Arc::new(RetryPolicy::new(provider, config.clone(), self.metrics.clone()));
        handlers.insert(provider.to_string(), handler.clone());
        handler
    }
}

/// Single entry point combining breaker and retry per provider:
/// `breaker.call(retry.execute(op))`.
pub struct Resilience {
    breakers: BreakerRegistry,
    retries: RetryRegistry,
}

impl Resilience {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            breakers: BreakerRegistry::new(metrics.clone()),
            retries: RetryRegistry::new(metrics),
        }
    }

    /// Execute `op` for `provider` under the full pipeline. The breaker
    /// observes the retry layer's final result, so an exhausted transient
    /// run counts as a single failure toward the threshold.
    pub async fn execute<T, Op, Fut>(
        &self,
        provider: &str,
        settings: &ResilienceSettings,
        op: Op,
    ) -> Result<T, GatewayError>
    where
        T: Send,
        Op: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, GatewayError>> + Send,
    {
        let breaker = self.breakers.get(provider, &settings.circuit_breaker);
        let retry = self.retries.get(provider, &settings.retry);
        breaker.call(move || async move { retry.execute(op).await }).await
    }

    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.snapshots()
    }

    pub fn breaker_snapshot(&self, provider: &str) -> Option<BreakerSnapshot> {
        self.breakers.snapshot_for(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn settings(max_attempts: u32, threshold: u32) -> ResilienceSettings {
        ResilienceSettings {
            circuit_breaker: CircuitBreakerSettings {
                failure_threshold: threshold,
                recovery_timeout: 60.0,
            },
            retry: RetrySettings {
                max_attempts,
                min_wait: 0.001,
                max_wait: 0.002,
                exp_base: 2.0,
                jitter: false,
            },
        }
    }

    fn transient() -> GatewayError {
        GatewayError::UpstreamServer { status: 500, message: "down".into() }
    }

    #[tokio::test]
    async fn exhausted_retry_counts_as_one_breaker_failure() {
        let resilience = Resilience::new(Arc::new(Metrics::new().unwrap()));
        let config = settings(3, 2);
        let calls = Arc::new(AtomicU32::new(0));

        let calls2 = calls.clone();
        let result: Result<(), _> = resilience
            .execute("p", &config, move || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(transient())
                }
            })
            .await;

        assert!(result.is_err());
        // The retry layer made all three attempts inside one breaker call.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let snapshot = resilience.breaker_snapshot("p").unwrap();
        assert_eq!(snapshot.consecutive_failures, 1);
        assert_eq!(snapshot.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn open_breaker_prevents_retry_attempts_entirely() {
        let resilience = Resilience::new(Arc::new(Metrics::new().unwrap()));
        let config = settings(1, 1);
        let calls = Arc::new(AtomicU32::new(0));

        let calls2 = calls.clone();
        let _: Result<(), _> = resilience
            .execute("p", &config, move || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(transient())
                }
            })
            .await;
        assert_eq!(resilience.breaker_snapshot("p").unwrap().state, CircuitState::Open);

        let calls3 = calls.clone();
        let result: Result<(), _> = resilience
            .execute("p", &config, move || {
                let calls = calls3.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(transient())
                }
            })
            .await;
        assert!(matches!(result.unwrap_err(), GatewayError::CircuitOpen { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn breaker_survives_reload_with_unchanged_tuning() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let registry = BreakerRegistry::new(metrics);
        let config = CircuitBreakerSettings { failure_threshold: 2, recovery_timeout: 30.0 };

        let first = registry.get("p", &config);
        let second = registry.get("p", &config.clone());
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn breaker_is_recreated_when_tuning_changes() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let registry = BreakerRegistry::new(metrics);
        let before = CircuitBreakerSettings { failure_threshold: 1, recovery_timeout: 30.0 };

        let breaker = registry.get("p", &before);
        let _ = breaker
            .call(|| async { Err::<(), _>(transient()) })
            .await;
        assert_eq!(registry.snapshot_for("p").unwrap().state, CircuitState::Open);

        // New tuning: fresh breaker, state reset.
        let after = CircuitBreakerSettings { failure_threshold: 5, recovery_timeout: 30.0 };
        let recreated = registry.get("p", &after);
        assert!(!Arc::ptr_eq(&breaker, &recreated));
        assert_eq!(registry.snapshot_for("p").unwrap().state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn retry_handler_is_recreated_when_tuning_changes() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let registry = RetryRegistry::new(metrics);
        let before = RetrySettings::default();
        let first = registry.get("p", &before);
        let same = registry.get("p", &before.clone());
        assert!(Arc::ptr_eq(&first, &same));

        let mut after = before.clone();
        after.max_attempts = 9;
        let recreated = registry.get("p", &after);
        assert!(!Arc::ptr_eq(&first, &recreated));
        assert_eq!(recreated.config().max_attempts, 9);
    }

    #[tokio::test]
    async fn probe_flows_through_the_same_pipeline() {
        use crate::providers::{MockProvider, Provider};

        let resilience = Resilience::new(Arc::new(Metrics::new().unwrap()));
        let provider = Arc::new(MockProvider::from_name("mock_openai"));
        let config = settings(2, 3);

        let health = resilience
            .execute("mock_openai", &config, || {
                let provider = provider.clone();
                async move { Ok(provider.probe().await) }
            })
            .await
            .unwrap();

        assert!(health.healthy);
        assert_eq!(
            resilience.breaker_snapshot("mock_openai").unwrap().state,
            CircuitState::Closed
        );
    }

    #[tokio::test]
    async fn snapshots_are_sorted_by_provider() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let registry = BreakerRegistry::new(metrics);
        let config = CircuitBreakerSettings::default();
        registry.get("zeta", &config);
        registry.get("alpha", &config);

        let names: Vec<String> =
            registry.snapshots().into_iter().map(|s| s.provider).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
