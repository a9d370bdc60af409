//! Gateway error taxonomy.
//!
//! Every failure that can surface from the routing/resilience pipeline is a
//! variant here. Variants carry enough context for the log line and the
//! outward HTTP mapping; classification helpers drive the retry layer
//! (`is_transient`) and the public surface (`status_code`).

use std::time::Duration;

use thiserror::Error;

/// Unified error type for the request pipeline.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// The router found no registered upstream to dispatch to.
    #[error("no inference providers available")]
    NoProviderAvailable,

    /// The circuit breaker short-circuited the call.
    #[error("provider {provider} is temporarily unavailable")]
    CircuitOpen {
        /// Name of the provider whose breaker is open.
        provider: String,
    },

    /// The upstream rejected the request as malformed (HTTP 400), or
    /// request validation failed before dispatch.
    #[error("invalid request: {message}")]
    BadRequest { message: String },

    /// The upstream rejected our credentials (HTTP 401). Masked to a 500
    /// outward so the gateway never leaks its own credential problems.
    #[error("provider {provider} authentication failed")]
    AuthenticationFailed { provider: String },

    /// Any other non-retryable 4xx from the upstream; the original status
    /// code is preserved outward.
    #[error("upstream returned client error {status}: {message}")]
    UpstreamClient { status: u16, message: String },

    /// HTTP 429 from the upstream. Retryable.
    #[error("provider {provider} rate limit exceeded")]
    RateLimited { provider: String },

    /// HTTP 408 from the upstream. Retryable.
    #[error("provider {provider} reported request timeout")]
    RequestTimeout { provider: String },

    /// HTTP 5xx from the upstream. Retryable.
    #[error("upstream server error {status}: {message}")]
    UpstreamServer { status: u16, message: String },

    /// TCP/TLS connect failure or any other transport I/O error. Retryable.
    #[error("failed to reach upstream: {message}")]
    Connectivity { message: String },

    /// The per-request deadline elapsed before the upstream answered.
    /// Retryable.
    #[error("upstream request exceeded {limit:?} deadline")]
    Timeout { limit: Duration },

    /// The upstream answered 200 with a body we could not parse. Not
    /// retryable: the upstream is reachable but misbehaving.
    #[error("upstream returned an unparseable response: {message}")]
    BadGateway { message: String },

    /// Uncategorized programming error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    /// Whether the retry layer may re-attempt this outcome.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::RateLimited { .. }
                | GatewayError::RequestTimeout { .. }
                | GatewayError::UpstreamServer { .. }
                | GatewayError::Connectivity { .. }
                | GatewayError::Timeout { .. }
        )
    }

    /// Outward HTTP status for this error once the pipeline has given up.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::NoProviderAvailable => 503,
            GatewayError::CircuitOpen { .. } => 503,
            GatewayError::BadRequest { .. } => 400,
            GatewayError::AuthenticationFailed { .. } => 500,
            GatewayError::UpstreamClient { status, .. } => *status,
            GatewayError::RateLimited { .. } => 429,
            GatewayError::RequestTimeout { .. } => 504,
            GatewayError::UpstreamServer { .. } => 502,
            GatewayError::Connectivity { .. } => 502,
            GatewayError::Timeout { .. } => 504,
            GatewayError::BadGateway { .. } => 502,
            GatewayError::Internal { .. } => 500,
        }
    }

    /// Machine-readable error type for the OpenAI-style error body.
    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::NoProviderAvailable => "no_provider_available",
            GatewayError::CircuitOpen { .. } => "circuit_open",
            GatewayError::BadRequest { .. } => "invalid_request_error",
            GatewayError::AuthenticationFailed { .. } => "internal_error",
            GatewayError::UpstreamClient { .. } => "upstream_client_error",
            GatewayError::RateLimited { .. } => "rate_limit_exceeded",
            GatewayError::RequestTimeout { .. } => "upstream_timeout",
            GatewayError::UpstreamServer { .. } => "upstream_error",
            GatewayError::Connectivity { .. } => "upstream_error",
            GatewayError::Timeout { .. } => "upstream_timeout",
            GatewayError::BadGateway { .. } => "bad_gateway",
            GatewayError::Internal { .. } => "internal_error",
        }
    }
}
