#![forbid(unsafe_code)]

//! # inference-gateway
//!
//! OpenAI-compatible model-inference gateway. Accepts chat-completion
//! requests over HTTP and dispatches each to one of several upstream
//! back-ends (OpenAI API, vLLM services, test doubles) through a
//! routing and resilience pipeline:
//!
//! - **Router** — deterministic `X-Provider-Priority` override, else
//!   weighted random selection over registered providers.
//! - **Circuit breaker** — per provider, with single-probe HALF_OPEN
//!   recovery.
//! - **Retry** — bounded exponential backoff with optional jitter,
//!   transient outcomes only.
//! - **Adapter** — one HTTP exchange per attempt, with a strict
//!   classification of the upstream error surface.
//! - **Health cache** — rate-limited, single-flighted provider checks
//!   feeding `/ready`.
//!
//! Configuration is a YAML document published as immutable snapshots;
//! edits to the file hot-reload without dropping in-flight requests.

pub mod config;
pub mod core;
pub mod error;
pub mod health;
pub mod metrics;
pub mod models;
pub mod providers;
pub mod resilience;
pub mod router;
pub mod server;

pub use crate::config::{ConfigHandle, GatewayConfig};
pub use crate::core::{spawn_config_watcher, GatewayCore};
pub use crate::error::GatewayError;
pub use crate::models::{ChatCompletionRequest, ChatCompletionResponse};
pub use crate::providers::{Provider, ProviderRegistry};
pub use crate::resilience::{CircuitBreaker, CircuitState, Resilience, RetryPolicy};
pub use crate::router::RequestRouter;
