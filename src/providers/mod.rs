//! Upstream adapters.
//!
//! One adapter per configured upstream, all behind the object-safe
//! [`Provider`] trait. Construction goes through [`build_provider`], which
//! dispatches on the configured kind and resolves credentials from the
//! environment.

pub mod mock;
pub mod openai;
pub mod registry;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::config::{ProviderKind, ProviderSettings};
use crate::error::GatewayError;
use crate::models::{ChatCompletionRequest, ChatCompletionResponse, ProviderHealth};

pub use mock::MockProvider;
pub use openai::OpenAiProvider;
pub use registry::ProviderRegistry;

/// Errors raised while constructing an adapter. A failed construction
/// skips that adapter only; the registry continues with the rest.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("credential environment variable {0} is not set")]
    MissingCredential(String),
    #[error("failed to construct HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Capability shared by every upstream kind.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Name the adapter was registered under.
    fn name(&self) -> &str;

    /// One normalized chat-completion exchange with the upstream.
    async fn complete(
        &self,
        request: &ChatCompletionRequest,
        request_id: &str,
    ) -> Result<ChatCompletionResponse, GatewayError>;

    /// Lightweight reachability probe with its own fixed 5 s deadline.
    async fn probe(&self) -> ProviderHealth;

    /// Release the adapter's HTTP resources. Idempotent.
    async fn close(&self) {}
}

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_VLLM_BASE_URL: &str = "http://localhost:8000/v1";
const DEFAULT_OPENAI_KEY_ENV: &str = "OPENAI_API_KEY";

/// Construct the adapter described by `settings`.
pub fn build_provider(settings: &ProviderSettings) -> Result<Arc<dyn Provider>, BuildError> {
    match settings.kind {
        ProviderKind::Openai => {
            let key_env =
                settings.api_key_env.as_deref().unwrap_or(DEFAULT_OPENAI_KEY_ENV);
            let api_key = std::env::var(key_env)
                .ok()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| BuildError::MissingCredential(key_env.to_string()))?;
            let base_url =
                settings.base_url.as_deref().unwrap_or(DEFAULT_OPENAI_BASE_URL);
            info!(provider = %settings.name, base_url, "creating openai adapter");
            Ok(Arc::new(OpenAiProvider::new(
                &settings.name,
                base_url,
                Some(api_key),
                settings.timeout_duration(),
            )?))
        }
        ProviderKind::Vllm => {
            let base_url = settings.base_url.as_deref().unwrap_or(DEFAULT_VLLM_BASE_URL);
            info!(provider = %settings.name, base_url, "creating vllm adapter");
            Ok(Arc::new(OpenAiProvider::new(
                &settings.name,
                base_url,
                None,
                settings.timeout_duration(),
            )?))
        }
        ProviderKind::Mock => Ok(Arc::new(MockProvider::from_name(&settings.name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    fn mock_settings(name: &str) -> ProviderSettings {
        let mut settings = GatewayConfig::default().providers[0].clone();
        settings.name = name.to_string();
        settings
    }

    #[test]
    fn mock_kind_builds_without_environment() {
        let provider = build_provider(&mock_settings("mock_openai")).unwrap();
        assert_eq!(provider.name(), "mock_openai");
    }

    #[test]
    fn openai_kind_requires_its_credential() {
        let mut settings = mock_settings("openai-main");
        settings.kind = ProviderKind::Openai;
        settings.api_key_env = Some("INFERENCE_GATEWAY_TEST_KEY_UNSET".to_string());

        let err = match build_provider(&settings) {
            Err(e) => e,
            Ok(_) => panic!("expected build_provider to fail"),
        };
        assert!(matches!(err, BuildError::MissingCredential(_)));
        assert!(err.to_string().contains("INFERENCE_GATEWAY_TEST_KEY_UNSET"));
    }

    #[test]
    fn vllm_kind_builds_without_credential() {
        let mut settings = mock_settings("vllm-local");
        settings.kind = ProviderKind::Vllm;
        settings.base_url = Some("http://127.0.0.1:8000/v1".to_string());
        let provider = build_provider(&settings).unwrap();
        assert_eq!(provider.name(), "vllm-local");
    }
}
