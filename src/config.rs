//! Gateway configuration: snapshot model, YAML loading, validation, and
//! the atomically-swappable handle used for hot reload.
//!
//! A [`GatewayConfig`] is an immutable snapshot. Reload produces a new
//! snapshot and publishes it through [`ConfigHandle`] with a pointer swap;
//! requests already holding a snapshot finish against it.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Kind of upstream an adapter speaks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Openai,
    Vllm,
    Mock,
}

fn default_weight() -> f64 {
    1.0
}

fn default_enabled() -> bool {
    true
}

fn default_provider_timeout() -> f64 {
    30.0
}

fn default_max_retries() -> u32 {
    3
}

/// Descriptor of a single upstream, immutable per snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub name: String,
    pub kind: ProviderKind,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the bearer credential (openai kind).
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub health_url: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Overall request deadline in seconds.
    #[serde(default = "default_provider_timeout")]
    pub timeout: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl ProviderSettings {
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }
}

/// Circuit breaker tuning. Compared by value to decide whether a breaker
/// survives a reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    #[serde(default = "CircuitBreakerSettings::default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds the breaker stays open before probing recovery.
    #[serde(default = "CircuitBreakerSettings::default_recovery_timeout")]
    pub recovery_timeout: f64,
}

impl CircuitBreakerSettings {
    fn default_failure_threshold() -> u32 {
        5
    }

    fn default_recovery_timeout() -> f64 {
        60.0
    }

    pub fn recovery_timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.recovery_timeout)
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: Self::default_failure_threshold(),
            recovery_timeout: Self::default_recovery_timeout(),
        }
    }
}

/// Retry tuning. Compared by value to decide whether a handler survives a
/// reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "RetrySettings::default_max_attempts")]
    pub max_attempts: u32,
    /// Seconds, first backoff step.
    #[serde(default = "RetrySettings::default_min_wait")]
    pub min_wait: f64,
    /// Seconds, backoff cap.
    #[serde(default = "RetrySettings::default_max_wait")]
    pub max_wait: f64,
    #[serde(default = "RetrySettings::default_exp_base")]
    pub exp_base: f64,
    #[serde(default = "RetrySettings::default_jitter")]
    pub jitter: bool,
}

impl RetrySettings {
    fn default_max_attempts() -> u32 {
        3
    }

    fn default_min_wait() -> f64 {
        1.0
    }

    fn default_max_wait() -> f64 {
        10.0
    }

    fn default_exp_base() -> f64 {
        2.0
    }

    fn default_jitter() -> bool {
        true
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            min_wait: Self::default_min_wait(),
            max_wait: Self::default_max_wait(),
            exp_base: Self::default_exp_base(),
            jitter: Self::default_jitter(),
        }
    }
}

/// Combined resilience tuning applied per provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResilienceSettings {
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(default)]
    pub retry: RetrySettings,
}

/// Health cache tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Minimum seconds between cache refreshes.
    #[serde(default = "HealthSettings::default_check_interval")]
    pub check_interval: f64,
    /// Per-check timeout in seconds.
    #[serde(default = "HealthSettings::default_timeout")]
    pub timeout: f64,
}

impl HealthSettings {
    fn default_check_interval() -> f64 {
        30.0
    }

    fn default_timeout() -> f64 {
        5.0
    }

    pub fn check_interval_duration(&self) -> Duration {
        Duration::from_secs_f64(self.check_interval)
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            check_interval: Self::default_check_interval(),
            timeout: Self::default_timeout(),
        }
    }
}

/// Listen address for the HTTP surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "ServerSettings::default_host")]
    pub host: String,
    #[serde(default = "ServerSettings::default_port")]
    pub port: u16,
}

impl ServerSettings {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        8080
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { host: Self::default_host(), port: Self::default_port() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "LoggingSettings::default_level")]
    pub level: String,
}

impl LoggingSettings {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: Self::default_level() }
    }
}

fn default_providers() -> Vec<ProviderSettings> {
    vec![
        ProviderSettings {
            name: "mock_openai".into(),
            kind: ProviderKind::Mock,
            base_url: None,
            api_key_env: None,
            health_url: None,
            weight: 0.5,
            enabled: true,
            timeout: default_provider_timeout(),
            max_retries: default_max_retries(),
        },
        ProviderSettings {
            name: "mock_vllm".into(),
            kind: ProviderKind::Mock,
            base_url: None,
            api_key_env: None,
            health_url: None,
            weight: 0.5,
            enabled: true,
            timeout: default_provider_timeout(),
            max_retries: default_max_retries(),
        },
    ]
}

/// Root configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderSettings>,
    #[serde(default)]
    pub health: HealthSettings,
    #[serde(default)]
    pub resilience: ResilienceSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            providers: default_providers(),
            health: HealthSettings::default(),
            resilience: ResilienceSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl GatewayConfig {
    /// Parse a YAML document into a snapshot. Does not validate.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Read and parse the file at `path`. Does not validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    /// Reject snapshots that could not operate correctly.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::Invalid("at least one provider must be configured".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for p in &self.providers {
            if p.name.is_empty() {
                return Err(ConfigError::Invalid("provider name must not be empty".into()));
            }
            if !seen.insert(p.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate provider name: {}", p.name)));
            }
            if p.weight < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "provider {} has negative weight {}",
                    p.name, p.weight
                )));
            }
            if p.timeout <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "provider {} timeout must be positive",
                    p.name
                )));
            }
        }

        let enabled_weight: f64 =
            self.providers.iter().filter(|p| p.enabled).map(|p| p.weight).sum();
        if enabled_weight <= 0.0 {
            return Err(ConfigError::Invalid(
                "at least one enabled provider must have weight > 0".into(),
            ));
        }

        let retry = &self.resilience.retry;
        if retry.max_attempts < 1 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if retry.min_wait <= 0.0 {
            return Err(ConfigError::Invalid("retry.min_wait must be positive".into()));
        }
        if retry.min_wait > retry.max_wait {
            return Err(ConfigError::Invalid(format!(
                "retry.min_wait ({}) must not exceed retry.max_wait ({})",
                retry.min_wait, retry.max_wait
            )));
        }
        if retry.exp_base <= 1.0 {
            return Err(ConfigError::Invalid("retry.exp_base must be greater than 1".into()));
        }

        let breaker = &self.resilience.circuit_breaker;
        if breaker.failure_threshold < 1 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.failure_threshold must be at least 1".into(),
            ));
        }
        if breaker.recovery_timeout <= 0.0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.recovery_timeout must be positive".into(),
            ));
        }

        if self.health.check_interval <= 0.0 || self.health.timeout <= 0.0 {
            return Err(ConfigError::Invalid(
                "health.check_interval and health.timeout must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Enabled upstream descriptors, in declaration order.
    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderSettings> {
        self.providers.iter().filter(|p| p.enabled)
    }

    /// Routing weights of enabled providers (zero weights included; the
    /// router decides how to treat them).
    pub fn provider_weights(&self) -> Vec<(String, f64)> {
        self.enabled_providers().map(|p| (p.name.clone(), p.weight)).collect()
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderSettings> {
        self.providers.iter().find(|p| p.name == name)
    }
}

/// Atomically swappable snapshot holder.
#[derive(Debug)]
pub struct ConfigHandle {
    inner: ArcSwap<GatewayConfig>,
}

impl ConfigHandle {
    pub fn new(config: GatewayConfig) -> Self {
        Self { inner: ArcSwap::from_pointee(config) }
    }

    /// Current snapshot. Cheap; callers keep the `Arc` for the duration of
    /// a request so reloads never change config mid-flight.
    pub fn current(&self) -> Arc<GatewayConfig> {
        self.inner.load_full()
    }

    /// Publish a new snapshot, returning the one it replaced.
    pub fn replace(&self, next: GatewayConfig) -> Arc<GatewayConfig> {
        self.inner.swap(Arc::new(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = GatewayConfig::default();
        config.validate().unwrap();
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.resilience.retry.max_attempts, 3);
    }

    #[test]
    fn yaml_round_trip_with_partial_document() {
        let raw = r#"
server:
  port: 9000
providers:
  - name: openai-primary
    kind: openai
    base_url: https://api.openai.com/v1
    api_key_env: OPENAI_API_KEY
    weight: 0.7
  - name: vllm-local
    kind: vllm
    base_url: http://localhost:8000/v1
    health_url: http://localhost:8000/health
    weight: 0.3
    timeout: 60.0
resilience:
  circuit_breaker:
    failure_threshold: 3
    recovery_timeout: 10.0
  retry:
    max_attempts: 2
    jitter: false
"#;
        let config = GatewayConfig::from_yaml(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].kind, ProviderKind::Openai);
        assert_eq!(config.providers[1].timeout, 60.0);
        assert!(config.providers[0].enabled);
        assert_eq!(config.resilience.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.resilience.retry.max_attempts, 2);
        assert!(!config.resilience.retry.jitter);
        // Untouched sections keep their defaults.
        assert_eq!(config.resilience.retry.min_wait, 1.0);
        assert_eq!(config.health.check_interval, 30.0);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut config = GatewayConfig::default();
        config.providers[1].name = config.providers[0].name.clone();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn negative_weight_is_rejected() {
        let mut config = GatewayConfig::default();
        config.providers[0].weight = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_total_enabled_weight_is_rejected() {
        let mut config = GatewayConfig::default();
        for p in &mut config.providers {
            p.weight = 0.0;
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn disabled_providers_do_not_count_toward_weight_total() {
        let mut config = GatewayConfig::default();
        config.providers[0].weight = 0.0;
        config.providers[1].enabled = false;
        assert!(config.validate().is_err());
        config.providers[0].weight = 1.0;
        config.validate().unwrap();
    }

    #[test]
    fn min_wait_above_max_wait_is_rejected() {
        let mut config = GatewayConfig::default();
        config.resilience.retry.min_wait = 20.0;
        config.resilience.retry.max_wait = 10.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn exp_base_must_exceed_one() {
        let mut config = GatewayConfig::default();
        config.resilience.retry.exp_base = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn provider_weights_cover_enabled_providers_only() {
        let mut config = GatewayConfig::default();
        config.providers[1].enabled = false;
        let weights = config.provider_weights();
        assert_eq!(weights.len(), 1);
        assert_eq!(weights[0].0, "mock_openai");
    }

    #[test]
    fn handle_swap_keeps_prior_snapshot_alive() {
        let handle = ConfigHandle::new(GatewayConfig::default());
        let before = handle.current();

        let mut next = GatewayConfig::default();
        next.server.port = 9999;
        let replaced = handle.replace(next);

        assert_eq!(replaced.server.port, before.server.port);
        assert_eq!(handle.current().server.port, 9999);
        // The request-held snapshot is unchanged by the swap.
        assert_eq!(before.server.port, 8080);
    }

    #[test]
    fn unknown_kind_fails_to_parse() {
        let raw = r#"
providers:
  - name: weird
    kind: anthropic
"#;
        assert!(GatewayConfig::from_yaml(raw).is_err());
    }
}
