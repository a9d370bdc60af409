//! HTTP surface of the gateway.
//!
//! Thin axum handlers over the shared [`GatewayCore`]; business logic
//! lives in the core and below. Routes mirror the OpenAI-compatible
//! contract plus health/readiness/metrics.

pub mod completions;
pub mod health;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::core::GatewayCore;
use crate::error::GatewayError;

pub type AppState = Arc<GatewayCore>;

pub(crate) const REQUEST_ID_HEADER: &str = "x-request-id";
pub(crate) const PROVIDER_PRIORITY_HEADER: &str = "x-provider-priority";

/// Assemble the full route table.
pub fn build_router(core: AppState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(completions::create_chat_completion))
        .route("/health", get(health::liveness))
        .route("/health/detailed", get(health::detailed))
        .route("/ready", get(health::readiness))
        .route("/health/providers", get(health::providers))
        .route("/health/providers/:name", get(health::provider_by_name))
        .route("/health/circuit-breakers", get(health::circuit_breakers))
        .route("/health/circuit-breakers/:name", get(health::circuit_breaker_by_name))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(core)
}

/// Bind and serve until ctrl-c, then close provider resources.
pub async fn serve(core: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(core.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    core.shutdown().await;
    Ok(())
}

async fn metrics(State(core): State<AppState>) -> Response {
    match core.metrics.render() {
        Ok(text) => {
            ([("content-type", "text/plain; version=0.0.4")], text).into_response()
        }
        Err(err) => {
            (StatusCode::INTERNAL_SERVER_ERROR, format!("metrics encoding failed: {err}"))
                .into_response()
        }
    }
}

#[derive(Serialize)]
struct ErrorDetail {
    message: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

/// Render a pipeline error as an OpenAI-style error document, echoing the
/// request id.
pub(crate) fn error_response(err: &GatewayError, request_id: &str) -> Response {
    let status = StatusCode::from_u16(err.status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorBody {
        error: ErrorDetail { message: err.to_string(), kind: err.error_type().to_string() },
    };
    (status, [(REQUEST_ID_HEADER, request_id.to_string())], Json(body)).into_response()
}

/// 404 document for unknown provider/breaker names.
pub(crate) fn not_found(message: String) -> Response {
    let body = ErrorBody { error: ErrorDetail { message, kind: "not_found".to_string() } };
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

/// Echo the caller's request id or mint `req-<16 hex>`.
pub(crate) fn request_id_from(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(generate_request_id)
}

fn generate_request_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("req-{}", &hex[..16])
}

pub(crate) fn provider_priority_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(PROVIDER_PRIORITY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_request_ids_have_the_documented_shape() {
        let id = generate_request_id();
        assert!(id.starts_with("req-"));
        assert_eq!(id.len(), 20);
        assert!(id[4..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn header_request_id_is_echoed() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, "req-custom".parse().unwrap());
        assert_eq!(request_id_from(&headers), "req-custom");
    }

    #[test]
    fn empty_header_falls_back_to_generation() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, "".parse().unwrap());
        assert!(request_id_from(&headers).starts_with("req-"));
    }

    #[test]
    fn priority_header_is_optional() {
        let headers = HeaderMap::new();
        assert_eq!(provider_priority_from(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert(PROVIDER_PRIORITY_HEADER, "mock_vllm".parse().unwrap());
        assert_eq!(provider_priority_from(&headers).as_deref(), Some("mock_vllm"));
    }
}
