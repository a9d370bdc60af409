//! Synthetic adapters for tests and local bring-up.
//!
//! Mocks never fail: they sleep a small fixed latency and answer with a
//! canned completion echoing the request's model. The flavor (openai- or
//! vllm-shaped) is inferred from the configured name.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::GatewayError;
use crate::models::{
    unix_timestamp, ChatCompletionChoice, ChatCompletionRequest, ChatCompletionResponse,
    ProviderHealth, TokenUsage,
};
use crate::providers::Provider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFlavor {
    OpenAi,
    Vllm,
}

impl MockFlavor {
    fn label(self) -> &'static str {
        match self {
            MockFlavor::OpenAi => "OpenAI",
            MockFlavor::Vllm => "vLLM",
        }
    }

    fn latency(self) -> Duration {
        match self {
            MockFlavor::OpenAi => Duration::from_millis(100),
            MockFlavor::Vllm => Duration::from_millis(200),
        }
    }

    fn usage(self) -> TokenUsage {
        match self {
            MockFlavor::OpenAi => TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 15,
                total_tokens: 25,
                ..TokenUsage::default()
            },
            MockFlavor::Vllm => TokenUsage {
                prompt_tokens: 12,
                completion_tokens: 18,
                total_tokens: 30,
                ..TokenUsage::default()
            },
        }
    }
}

#[derive(Debug)]
pub struct MockProvider {
    name: String,
    flavor: MockFlavor,
}

impl MockProvider {
    pub fn new(name: impl Into<String>, flavor: MockFlavor) -> Self {
        Self { name: name.into(), flavor }
    }

    /// Infer the flavor from the provider name; defaults to openai-shaped.
    pub fn from_name(name: &str) -> Self {
        let flavor = if name.to_lowercase().contains("vllm") {
            MockFlavor::Vllm
        } else {
            MockFlavor::OpenAi
        };
        Self::new(name, flavor)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: &ChatCompletionRequest,
        request_id: &str,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        tokio::time::sleep(self.flavor.latency()).await;

        let last_content =
            request.messages.last().map(|m| m.content.as_str()).unwrap_or_default();
        Ok(ChatCompletionResponse {
            id: request_id.to_string(),
            object: "chat.completion".to_string(),
            created: unix_timestamp(),
            model: request.model.clone(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: json!({
                    "role": "assistant",
                    "content": format!("Mock {} response for: {}", self.flavor.label(), last_content),
                }),
                finish_reason: Some("stop".to_string()),
            }],
            usage: self.flavor.usage(),
        })
    }

    async fn probe(&self) -> ProviderHealth {
        ProviderHealth {
            name: self.name.clone(),
            healthy: true,
            latency_ms: Some(self.flavor.latency().as_secs_f64() * 1000.0),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatMessage, Role};

    fn request(model: &str, content: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: model.into(),
            messages: vec![ChatMessage { role: Role::User, content: content.into(), name: None }],
            temperature: None,
            max_tokens: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            stream: false,
            user: None,
        }
    }

    #[test]
    fn flavor_is_inferred_from_the_name() {
        assert_eq!(MockProvider::from_name("mock_vllm").flavor, MockFlavor::Vllm);
        assert_eq!(MockProvider::from_name("mock_openai").flavor, MockFlavor::OpenAi);
        assert_eq!(MockProvider::from_name("something_else").flavor, MockFlavor::OpenAi);
    }

    #[tokio::test]
    async fn completion_echoes_model_and_request_id() {
        tokio::time::pause();
        let provider = MockProvider::from_name("mock_openai");
        let response = provider.complete(&request("gpt-4", "ping"), "req-abc").await.unwrap();

        assert_eq!(response.id, "req-abc");
        assert_eq!(response.model, "gpt-4");
        assert_eq!(response.usage.total_tokens, 25);
        let content = response.choices[0].message["content"].as_str().unwrap();
        assert!(content.contains("ping"));
        assert!(content.contains("OpenAI"));
    }

    #[tokio::test]
    async fn vllm_flavor_reports_its_own_usage_numbers() {
        tokio::time::pause();
        let provider = MockProvider::from_name("mock_vllm");
        let response = provider.complete(&request("llama", "hi"), "req-x").await.unwrap();
        assert_eq!(response.usage.total_tokens, 30);
        assert!(response.choices[0].message["content"].as_str().unwrap().contains("vLLM"));
    }

    #[tokio::test]
    async fn probe_is_always_healthy() {
        let provider = MockProvider::from_name("mock_openai");
        let health = provider.probe().await;
        assert!(health.healthy);
        assert_eq!(health.latency_ms, Some(100.0));
    }
}
