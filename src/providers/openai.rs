//! Adapter for OpenAI-compatible upstreams.
//!
//! Covers both the `openai` kind (bearer credential attached) and the
//! `vllm` kind (no credential); both speak the same wire contract:
//! `POST {base_url}/chat/completions` and `GET {base_url}/models`.
//!
//! The status/outcome classification in [`classify_status`] is the load-
//! bearing contract of this module; see the table in the module tests.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::models::{
    unix_timestamp, ChatCompletionRequest, ChatCompletionResponse, ProviderHealth,
};
use crate::providers::{BuildError, Provider};

/// Probe deadline, independent of the completion timeout.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// How much upstream body text to carry into error messages.
const ERROR_BODY_LIMIT: usize = 512;

pub struct OpenAiProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    client: Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_deref().map(|_| "***"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Pull `error.message` out of an upstream error body, falling back to the
/// raw text.
fn extract_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(message) = value.pointer("/error/message").and_then(|m| m.as_str()) {
            return message.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "invalid request".to_string()
    } else {
        truncate(trimmed)
    }
}

fn truncate(body: &str) -> String {
    if body.len() <= ERROR_BODY_LIMIT {
        body.to_string()
    } else {
        let mut end = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body[..end].to_string()
    }
}

impl OpenAiProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BuildError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            timeout,
            client,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn models_url(&self) -> String {
        format!("{}/models", self.base_url)
    }

    /// Map an HTTP status plus body to an adapter outcome.
    fn classify_status(&self, status: u16, body: &str) -> GatewayError {
        match status {
            400 => GatewayError::BadRequest { message: extract_error_message(body) },
            401 => GatewayError::AuthenticationFailed { provider: self.name.clone() },
            408 => GatewayError::RequestTimeout { provider: self.name.clone() },
            429 => GatewayError::RateLimited { provider: self.name.clone() },
            402..=499 => GatewayError::UpstreamClient { status, message: truncate(body) },
            500..=599 => GatewayError::UpstreamServer { status, message: truncate(body) },
            other => GatewayError::BadGateway {
                message: format!("unexpected upstream status {other}"),
            },
        }
    }

    /// Map a transport-level failure to an adapter outcome.
    fn classify_transport(&self, err: &reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout { limit: self.timeout }
        } else {
            GatewayError::Connectivity { message: err.to_string() }
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: &ChatCompletionRequest,
        request_id: &str,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        let started = Instant::now();
        let mut builder = self.client.post(self.completions_url()).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response =
            builder.send().await.map_err(|e| self.classify_transport(&e))?;
        let status = response.status().as_u16();

        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            let outcome = self.classify_status(status, &body);
            warn!(
                provider = %self.name,
                request_id,
                status,
                error = %outcome,
                "upstream request failed"
            );
            return Err(outcome);
        }

        let body = response.text().await.map_err(|e| self.classify_transport(&e))?;
        let mut parsed: ChatCompletionResponse =
            serde_json::from_str(&body).map_err(|e| GatewayError::BadGateway {
                message: format!("invalid completion body: {e}"),
            })?;

        if parsed.id.is_empty() {
            parsed.id = request_id.to_string();
        }
        if parsed.created == 0 {
            parsed.created = unix_timestamp();
        }
        if parsed.model.is_empty() {
            parsed.model = request.model.clone();
        }

        debug!(
            provider = %self.name,
            request_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "upstream request succeeded"
        );
        Ok(parsed)
    }

    async fn probe(&self) -> ProviderHealth {
        let started = Instant::now();
        let result = self.client.get(self.models_url()).timeout(PROBE_TIMEOUT).send().await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(response) if response.status().is_success() => ProviderHealth {
                name: self.name.clone(),
                healthy: true,
                latency_ms: Some(latency_ms),
                error: None,
            },
            Ok(response) => ProviderHealth {
                name: self.name.clone(),
                healthy: false,
                latency_ms: Some(latency_ms),
                error: Some(format!("HTTP {}", response.status().as_u16())),
            },
            Err(err) => ProviderHealth {
                name: self.name.clone(),
                healthy: false,
                latency_ms: Some(latency_ms),
                error: Some(err.to_string()),
            },
        }
    }

    async fn close(&self) {
        // reqwest pools close with the client; nothing to tear down beyond
        // dropping our handle, but the event is worth a log line.
        debug!(provider = %self.name, "adapter closed");
    }
}
