//! Gateway core: the explicit state bundle handed to request handlers.
//!
//! Owns the config handle, provider registry, resilience registries,
//! health cache, and metrics. Constructed once at startup, shut down
//! explicitly, and shared by `Arc`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::config::{ConfigHandle, GatewayConfig};
use crate::error::GatewayError;
use crate::health::HealthCache;
use crate::metrics::Metrics;
use crate::models::{ChatCompletionRequest, ChatCompletionResponse};
use crate::providers::ProviderRegistry;
use crate::resilience::Resilience;
use crate::router::RequestRouter;

pub struct GatewayCore {
    config: ConfigHandle,
    pub registry: ProviderRegistry,
    pub resilience: Resilience,
    pub health: HealthCache,
    pub metrics: Arc<Metrics>,
}

impl GatewayCore {
    /// Build the core from a validated config snapshot and register its
    /// providers.
    pub async fn new(config: GatewayConfig) -> Result<Arc<Self>, GatewayError> {
        let metrics = Arc::new(Metrics::new().map_err(|e| GatewayError::Internal {
            message: format!("failed to build metrics registry: {e}"),
        })?);

        let core = Arc::new(Self {
            config: ConfigHandle::new(config.clone()),
            registry: ProviderRegistry::new(),
            resilience: Resilience::new(metrics.clone()),
            health: HealthCache::new(metrics.clone()),
            metrics,
        });
        core.registry.initialize(&config).await;
        Ok(core)
    }

    /// Current config snapshot. Handlers hold it for the whole request.
    pub fn config(&self) -> Arc<GatewayConfig> {
        self.config.current()
    }

    /// Publish a reloaded snapshot. The registry is rebuilt only when the
    /// provider set changed; breaker/retry tuning changes take effect
    /// lazily through the resilience registries.
    pub async fn apply_reload(&self, next: GatewayConfig) {
        let previous = self.config.replace(next.clone());
        info!(
            providers_before = previous.providers.len(),
            providers_after = next.providers.len(),
            "configuration reloaded"
        );
        if previous.providers != next.providers {
            info!("provider set changed, reinitializing registry");
            self.registry.initialize(&next).await;
        }
        if previous.resilience != next.resilience {
            info!("resilience tuning changed, handlers will be recreated on next use");
        }
    }

    /// Route and execute one chat completion through the resilience
    /// pipeline, recording request metrics.
    pub async fn handle_completion(
        &self,
        request: &ChatCompletionRequest,
        request_id: &str,
        provider_priority: Option<&str>,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        request.validate()?;

        let config = self.config();
        let router = RequestRouter::new(config.provider_weights()).map_err(|e| {
            GatewayError::Internal { message: format!("router construction failed: {e}") }
        })?;
        let provider = router.select(provider_priority, &self.registry)?;
        let provider_name = provider.name().to_string();

        info!(
            request_id,
            provider = %provider_name,
            model = %request.model,
            "dispatching chat completion"
        );

        let started = Instant::now();
        let result = self
            .resilience
            .execute(&provider_name, &config.resilience, || {
                let provider = provider.clone();
                let request = request.clone();
                let request_id = request_id.to_string();
                async move { provider.complete(&request, &request_id).await }
            })
            .await;

        let elapsed = started.elapsed();
        let status = match &result {
            Ok(_) => 200,
            Err(err) => err.status_code(),
        };
        let status_label = status.to_string();
        self.metrics
            .requests_total
            .with_label_values(&[provider_name.as_str(), status_label.as_str()])
            .inc();
        self.metrics
            .request_duration_seconds
            .with_label_values(&[provider_name.as_str()])
            .observe(elapsed.as_secs_f64());

        match &result {
            Ok(_) => info!(
                request_id,
                provider = %provider_name,
                elapsed_ms = elapsed.as_millis() as u64,
                "request completed"
            ),
            Err(err) => warn!(
                request_id,
                provider = %provider_name,
                error = %err,
                status,
                "request failed"
            ),
        }
        result
    }

    /// Tear down provider resources. Idempotent.
    pub async fn shutdown(&self) {
        self.registry.close_all().await;
        info!("gateway core shut down");
    }
}

/// Watch the config file for modification-time changes and publish
/// validated snapshots to the core. Poll granularity is two seconds.
pub fn spawn_config_watcher(
    core: Arc<GatewayCore>,
    path: PathBuf,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
        let mut ticker = tokio::time::interval(Duration::from_secs(2));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(m) => m,
                Err(_) => continue,
            };
            if last_modified == Some(modified) {
                continue;
            }
            last_modified = Some(modified);

            match GatewayConfig::load(&path) {
                Ok(next) => match next.validate() {
                    Ok(()) => core.apply_reload(next).await,
                    Err(err) => {
                        error!(error = %err, "reloaded config is invalid, keeping current snapshot");
                    }
                },
                Err(err) => {
                    error!(error = %err, "failed to re-read config file, keeping current snapshot");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatMessage, Role};
    use crate::resilience::CircuitState;

    fn request(model: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: model.into(),
            messages: vec![ChatMessage { role: Role::User, content: "hi".into(), name: None }],
            temperature: None,
            max_tokens: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            stream: false,
            user: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn completion_flows_through_mock_provider() {
        let core = GatewayCore::new(GatewayConfig::default()).await.unwrap();
        let response =
            core.handle_completion(&request("gpt-4"), "req-1", Some("mock_openai")).await.unwrap();

        assert_eq!(response.model, "gpt-4");
        assert_eq!(response.id, "req-1");
        let rendered = core.metrics.render().unwrap();
        assert!(rendered.contains("gateway_requests_total"));
    }

    #[tokio::test]
    async fn invalid_request_is_rejected_before_routing() {
        let core = GatewayCore::new(GatewayConfig::default()).await.unwrap();
        let mut bad = request("gpt-4");
        bad.messages.clear();
        let err = core.handle_completion(&bad, "req-2", None).await.unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest { .. }));
    }

    #[tokio::test]
    async fn reload_with_same_providers_keeps_registry() {
        let core = GatewayCore::new(GatewayConfig::default()).await.unwrap();
        let names_before = core.registry.names();

        let mut next = GatewayConfig::default();
        next.server.port = 9001;
        core.apply_reload(next).await;

        assert_eq!(core.registry.names(), names_before);
        assert_eq!(core.config().server.port, 9001);
    }

    #[tokio::test]
    async fn reload_with_changed_provider_set_reinitializes() {
        let core = GatewayCore::new(GatewayConfig::default()).await.unwrap();

        let mut next = GatewayConfig::default();
        next.providers.retain(|p| p.name == "mock_vllm");
        core.apply_reload(next).await;

        assert_eq!(core.registry.names(), vec!["mock_vllm"]);
    }

    #[tokio::test]
    async fn breaker_state_survives_reload_with_unchanged_tuning() {
        let core = GatewayCore::new(GatewayConfig::default()).await.unwrap();
        // Seed a breaker by running one request through it.
        let _ = core
            .handle_completion(&request("gpt-4"), "req-3", Some("mock_openai"))
            .await
            .unwrap();
        assert_eq!(
            core.resilience.breaker_snapshot("mock_openai").unwrap().state,
            CircuitState::Closed
        );

        core.apply_reload(GatewayConfig::default()).await;
        assert!(core.resilience.breaker_snapshot("mock_openai").is_some());
    }
}
