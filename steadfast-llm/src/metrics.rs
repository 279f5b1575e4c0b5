//! Metrics emission surface.
//!
//! The pipeline emits through a caller-supplied [`MetricsCollector`]; the
//! crate ships no sink. Names and label keys are stable:
//!
//! - `llm_latency_seconds` — histogram, one sample per observed request
//! - `llm_requests_total` — counter, labels `{provider, model, status}`
//! - `llm_tokens_total` — counter, labels add `token_type ∈ {input, output}`,
//!   incremented only on success

use std::time::Duration;

/// Histogram of end-to-end request latency in seconds.
pub const METRIC_LATENCY_SECONDS: &str = "llm_latency_seconds";
/// Counter of completed requests.
pub const METRIC_REQUESTS_TOTAL: &str = "llm_requests_total";
/// Counter of tokens processed, split by `token_type`.
pub const METRIC_TOKENS_TOTAL: &str = "llm_tokens_total";

/// Sink for pipeline metrics. Implementations must be cheap and
/// non-blocking; they are called on the request path.
pub trait MetricsCollector: Send + Sync {
    fn record_counter(&self, name: &str, value: u64, labels: &[(&str, &str)]);
    fn record_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]);
    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]);
    fn record_latency(&self, operation: &str, duration: Duration, labels: &[(&str, &str)]);
}

/// Derive the provider label from a model identifier.
pub fn provider_from_model(model: &str) -> &'static str {
    if model.starts_with("gpt") {
        "openai"
    } else if model.starts_with("claude") {
        "anthropic"
    } else if model.starts_with("gemini") {
        "google"
    } else {
        "unknown"
    }
}
