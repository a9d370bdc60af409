//! Prometheus metrics for the gateway.
//!
//! One registry per process, owned by the core and injected into the
//! resilience layers. Rendered as text exposition by `GET /metrics`.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

/// Bundle of every metric the gateway records.
pub struct Metrics {
    registry: Registry,
    /// Completed requests by provider and outward status code.
    pub requests_total: IntCounterVec,
    /// End-to-end request latency through the resilience pipeline.
    pub request_duration_seconds: HistogramVec,
    /// Health cache refresh outcomes.
    pub health_checks_total: IntCounterVec,
    /// Breaker state per provider: 0 closed, 1 open, 2 half-open.
    pub breaker_state: IntGaugeVec,
    /// Admissions by breaker state at call time.
    pub breaker_calls_total: IntCounterVec,
    pub breaker_failures_total: IntCounterVec,
    pub breaker_successes_total: IntCounterVec,
    /// Adapter invocations made by the retry layer.
    pub retry_attempts_total: IntCounterVec,
    /// Calls that consumed every attempt without success.
    pub retry_exhausted_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("gateway_requests_total", "Total completed gateway requests"),
            &["provider", "status_code"],
        )?;
        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("gateway_request_duration_seconds", "Request duration in seconds"),
            &["provider"],
        )?;
        let health_checks_total = IntCounterVec::new(
            Opts::new("gateway_provider_health_checks_total", "Provider health check results"),
            &["provider", "status"],
        )?;
        let breaker_state = IntGaugeVec::new(
            Opts::new("circuit_breaker_state", "Breaker state (0=closed, 1=open, 2=half_open)"),
            &["provider"],
        )?;
        let breaker_calls_total = IntCounterVec::new(
            Opts::new("circuit_breaker_calls_total", "Breaker admissions by state"),
            &["provider", "state"],
        )?;
        let breaker_failures_total = IntCounterVec::new(
            Opts::new("circuit_breaker_failures_total", "Failures recorded by breakers"),
            &["provider"],
        )?;
        let breaker_successes_total = IntCounterVec::new(
            Opts::new("circuit_breaker_successes_total", "Successes recorded by breakers"),
            &["provider"],
        )?;
        let retry_attempts_total = IntCounterVec::new(
            Opts::new("retry_attempts_total", "Adapter invocations made by the retry layer"),
            &["provider"],
        )?;
        let retry_exhausted_total = IntCounterVec::new(
            Opts::new("retry_exhausted_total", "Calls that exhausted every retry attempt"),
            &["provider"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(health_checks_total.clone()))?;
        registry.register(Box::new(breaker_state.clone()))?;
        registry.register(Box::new(breaker_calls_total.clone()))?;
        registry.register(Box::new(breaker_failures_total.clone()))?;
        registry.register(Box::new(breaker_successes_total.clone()))?;
        registry.register(Box::new(retry_attempts_total.clone()))?;
        registry.register(Box::new(retry_exhausted_total.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration_seconds,
            health_checks_total,
            breaker_state,
            breaker_calls_total,
            breaker_failures_total,
            breaker_successes_total,
            retry_attempts_total,
            retry_exhausted_total,
        })
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
