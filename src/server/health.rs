//! Health, readiness, and breaker inspection endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::health::HealthStatus;
use crate::models::unix_timestamp_f64;
use crate::router::RequestRouter;
use crate::server::{not_found, AppState};

const SERVICE_NAME: &str = "inference-gateway";

/// `GET /health` — liveness, always 200.
pub async fn liveness() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "timestamp": unix_timestamp_f64(),
    }))
}

/// `GET /health/detailed` — overall and per-provider health.
pub async fn detailed(State(core): State<AppState>) -> Json<serde_json::Value> {
    let config = core.config();
    core.health.refresh(&config).await;

    let enabled: Vec<&str> = config.enabled_providers().map(|p| p.name.as_str()).collect();
    let healthy = enabled
        .iter()
        .filter(|name| {
            core.health.get(name).map(|e| e.status == HealthStatus::Healthy).unwrap_or(false)
        })
        .count();
    let total = enabled.len();

    let overall = if total == 0 || healthy == 0 {
        "unhealthy"
    } else if healthy < total {
        "degraded"
    } else {
        "healthy"
    };

    let details: Vec<_> =
        core.health.entries().into_iter().filter(|e| enabled.contains(&e.name.as_str())).collect();

    Json(json!({
        "status": overall,
        "service": SERVICE_NAME,
        "timestamp": unix_timestamp_f64(),
        "providers": {
            "total": total,
            "healthy": healthy,
            "unhealthy": total - healthy,
            "details": details,
        },
        "configuration": {
            "health_check_interval": config.health.check_interval,
            "last_health_check": core.health.last_refresh_at(),
        },
    }))
}

/// `GET /ready` — 200 when at least one registered provider is healthy in
/// the cache, else 503 with the available/healthy sets.
pub async fn readiness(State(core): State<AppState>) -> Response {
    let config = core.config();
    core.health.refresh(&config).await;

    let available = match RequestRouter::new(config.provider_weights()) {
        Ok(router) => router.available(&core.registry),
        Err(_) => Vec::new(),
    };
    let healthy: Vec<String> = core
        .health
        .healthy_names()
        .into_iter()
        .filter(|name| core.registry.contains(name))
        .collect();
    let is_ready = !healthy.is_empty();
    let provider_count = available.len();
    let healthy_count = healthy.len();

    let body = json!({
        "status": if is_ready { "ready" } else { "not_ready" },
        "available_providers": available,
        "healthy_providers": healthy,
        "provider_count": provider_count,
        "healthy_count": healthy_count,
        "timestamp": unix_timestamp_f64(),
    });

    let status = if is_ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(body)).into_response()
}

/// `GET /health/providers` — full health cache dump.
pub async fn providers(State(core): State<AppState>) -> Json<serde_json::Value> {
    let config = core.config();
    core.health.refresh(&config).await;

    Json(json!({
        "providers": core.health.entries(),
        "last_updated": core.health.last_refresh_at(),
        "timestamp": unix_timestamp_f64(),
    }))
}

/// `GET /health/providers/{name}` — one provider's entry, 404 if unknown.
pub async fn provider_by_name(
    State(core): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    let config = core.config();
    core.health.refresh(&config).await;

    match core.health.get(&name) {
        Some(entry) => Json(entry).into_response(),
        None => not_found(format!("provider '{name}' not found")),
    }
}

/// `GET /health/circuit-breakers` — every breaker's state snapshot.
pub async fn circuit_breakers(State(core): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "circuit_breakers": core.resilience.breaker_snapshots(),
        "timestamp": unix_timestamp_f64(),
    }))
}

/// `GET /health/circuit-breakers/{name}` — one breaker, 404 if unknown.
pub async fn circuit_breaker_by_name(
    State(core): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    match core.resilience.breaker_snapshot(&name) {
        Some(snapshot) => Json(json!({
            "circuit_breaker": snapshot,
            "timestamp": unix_timestamp_f64(),
        }))
        .into_response(),
        None => not_found(format!("circuit breaker for provider '{name}' not found")),
    }
}
