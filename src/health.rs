//! Provider health cache feeding readiness.
//!
//! Refresh is lazy (triggered by readiness and health queries), rate
//! limited to one pass per `health.check_interval`, and single-flighted:
//! concurrent callers wait on one refresh instead of stacking requests on
//! the upstreams. Refresh failures never propagate; stale entries stay
//! until a later pass overwrites them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{GatewayConfig, ProviderSettings};
use crate::metrics::Metrics;
use crate::models::unix_timestamp_f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    fn label(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }
}

/// One provider's latest health observation.
#[derive(Debug, Clone, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Unix timestamp of the observation.
    pub checked_at: f64,
}

pub struct HealthCache {
    entries: Mutex<HashMap<String, HealthEntry>>,
    last_refresh: Mutex<Option<(Instant, f64)>>,
    /// Single-flight gate around the refresh section.
    refresh_gate: tokio::sync::Mutex<()>,
    client: reqwest::Client,
    metrics: Arc<Metrics>,
}

impl HealthCache {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            last_refresh: Mutex::new(None),
            refresh_gate: tokio::sync::Mutex::new(()),
            client: reqwest::Client::new(),
            metrics,
        }
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, HealthEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Refresh the cache if `check_interval` has elapsed since the last
    /// pass. Concurrent callers coalesce into a single refresh.
    pub async fn refresh(&self, config: &GatewayConfig) {
        let _flight = self.refresh_gate.lock().await;

        let due = {
            let last = self.last_refresh.lock().unwrap_or_else(|p| p.into_inner());
            match *last {
                Some((at, _)) => at.elapsed() >= config.health.check_interval_duration(),
                None => true,
            }
        };
        if !due {
            return;
        }

        debug!("refreshing provider health cache");
        let timeout = config.health.timeout_duration();
        let checks = config.enabled_providers().map(|p| self.check_one(p, timeout));
        let results = futures::future::join_all(checks).await;

        {
            let mut entries = self.lock_entries();
            for entry in results {
                self.metrics
                    .health_checks_total
                    .with_label_values(&[entry.name.as_str(), entry.status.label()])
                    .inc();
                entries.insert(entry.name.clone(), entry);
            }
        }
        *self.last_refresh.lock().unwrap_or_else(|p| p.into_inner()) =
            Some((Instant::now(), unix_timestamp_f64()));
    }

    async fn check_one(&self, settings: &ProviderSettings, timeout: Duration) -> HealthEntry {
        let Some(url) = settings.health_url.as_deref() else {
            // No health endpoint configured: a registered provider counts
            // as healthy.
            return HealthEntry {
                name: settings.name.clone(),
                status: HealthStatus::Healthy,
                latency_ms: Some(0.0),
                error: None,
                checked_at: unix_timestamp_f64(),
            };
        };

        let started = Instant::now();
        let result = self.client.get(url).timeout(timeout).send().await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let checked_at = unix_timestamp_f64();

        match result {
            Ok(response) if response.status().as_u16() == 200 => HealthEntry {
                name: settings.name.clone(),
                status: HealthStatus::Healthy,
                latency_ms: Some(latency_ms),
                error: None,
                checked_at,
            },
            Ok(response) => HealthEntry {
                name: settings.name.clone(),
                status: HealthStatus::Unhealthy,
                latency_ms: Some(latency_ms),
                error: Some(format!("HTTP {}", response.status().as_u16())),
                checked_at,
            },
            Err(err) => {
                warn!(provider = %settings.name, error = %err, "health check failed");
                let error = if err.is_timeout() { "timeout".to_string() } else { err.to_string() };
                HealthEntry {
                    name: settings.name.clone(),
                    status: HealthStatus::Unhealthy,
                    latency_ms: Some(latency_ms),
                    error: Some(error),
                    checked_at,
                }
            }
        }
    }

    /// All cached entries, sorted by provider name.
    pub fn entries(&self) -> Vec<HealthEntry> {
        let mut entries: Vec<HealthEntry> = self.lock_entries().values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn get(&self, name: &str) -> Option<HealthEntry> {
        self.lock_entries().get(name).cloned()
    }

    /// Names currently marked healthy.
    pub fn healthy_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock_entries()
            .values()
            .filter(|e| e.status == HealthStatus::Healthy)
            .map(|e| e.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Unix timestamp of the last completed refresh, if any.
    pub fn last_refresh_at(&self) -> Option<f64> {
        self.last_refresh.lock().unwrap_or_else(|p| p.into_inner()).map(|(_, ts)| ts)
    }
}
