//! # Steadfast LLM
//!
//! A resilient Rust client for multi-provider LLM chat completions. One
//! operation — complete a prompt — is unified across OpenAI-compatible,
//! Anthropic, and Google Gemini endpoints and threaded through an ordered
//! chain of cross-cutting behaviors:
//!
//! - **Rate limiting**: token-bucket admission with burst capacity
//! - **Circuit breaking**: per-client three-state breaker with cooldown
//! - **Retries**: bounded exponential backoff with jitter over transient
//!   failures
//! - **Timeouts**: per-attempt deadlines that respect caller deadlines
//! - **Metrics and tracing**: end-to-end observability through
//!   caller-supplied sinks
//!
//! ## Quick start
//!
//! ```rust
//! use std::time::Duration;
//! use steadfast_llm::{Client, ClientConfig, Middleware, RequestContext, RetryPolicy};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new(std::env::var("OPENAI_API_KEY")?, "gpt-4")
//!         .with_middleware(vec![
//!             Middleware::Retry(RetryPolicy::default()),
//!             Middleware::Timeout(Duration::from_secs(30)),
//!         ]);
//!     let client = Client::new("openai", config)?;
//!
//!     let ctx = RequestContext::new().with_timeout(Duration::from_secs(60));
//!     let text = client.complete(&ctx, "Say hello.", None).await?;
//!     println!("{text}");
//!     Ok(())
//! }
//! ```
//!
//! ## Registry
//!
//! A [`Registry`] owns configured clients, resolves `provider/model`
//! selectors, validates models against declared capabilities, and builds
//! clients lazily from environment-sourced credentials:
//!
//! ```rust
//! use steadfast_llm::{ProviderSpec, Registry, RegistryConfig};
//!
//! let mut providers = std::collections::HashMap::new();
//! providers.insert(
//!     "openai".to_string(),
//!     ProviderSpec::new("openai", "OPENAI_API_KEY", "gpt-4")
//!         .with_supported_models(vec!["gpt-4".into(), "gpt-3.5-turbo".into()]),
//! );
//! let registry = Registry::new(RegistryConfig {
//!     providers,
//!     default_provider: "openai".to_string(),
//!     default_timeout: std::time::Duration::from_secs(30),
//!     default_middleware: Vec::new(),
//! })?;
//!
//! let client = registry.get_client("openai/gpt-4")?;
//! ```
//!
//! ## Middleware order
//!
//! The first-listed middleware is outermost. The recommended order is
//! tracing → metrics → rate limiter → circuit breaker → retry → timeout:
//! observability measures the whole request including waits, the rate
//! limiter shapes pressure onto everything downstream, the breaker
//! short-circuits before retries can amplify load, and retries give each
//! attempt a fresh deadline.
//!
//! ## Errors
//!
//! Callers receive a [`ClientError`]: either a classified
//! [`ProviderError`] (provider name, kind, status code, message, cause)
//! or one of the sentinel values middleware branches on
//! (`CircuitOpen`, `EmptyResponse`, ...). Retry exhaustion wraps the last
//! cause and preserves `source()` unwrapping.

pub mod circuit_breaker;
pub mod client;
pub mod common;
pub mod context;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod providers;
pub mod rate_limit;
pub mod registry;
pub mod retry;
pub mod tokens;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerHook, CircuitSnapshot, CircuitState,
};
pub use client::{Client, ClientBuilder, ClientConfig};
pub use context::RequestContext;
pub use error::{ClientError, ErrorKind, ProviderError};
pub use metrics::{
    provider_from_model, MetricsCollector, METRIC_LATENCY_SECONDS, METRIC_REQUESTS_TOTAL,
    METRIC_TOKENS_TOTAL,
};
pub use middleware::Middleware;
pub use models::{Completion, OptionMap, RequestOptions};
pub use providers::{create_provider, register_provider_factory, Provider, ProviderFactory};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use registry::{ProviderSpec, Registry, RegistryConfig};
pub use retry::RetryPolicy;
pub use tokens::{CachingEstimator, CharEstimator, TokenEstimator};

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::new("sk-test", "gpt-4");
        assert_eq!(config.api_key, "sk-test");
        assert_eq!(config.model, "gpt-4");
        assert!(config.base_url.is_none());
        assert_eq!(config.timeout.as_secs(), 30);
        assert!(config.middleware.is_empty());
    }

    #[test]
    fn test_provider_spec_builder() {
        let spec = ProviderSpec::new("gemini", "GOOGLE_API_KEY", "gemini-1.5-pro")
            .with_supported_models(vec!["gemini-1.5-pro".to_string()])
            .with_base_url("https://generativelanguage.googleapis.com/v1beta");
        assert_eq!(spec.provider_type, "gemini");
        assert_eq!(spec.env_var, "GOOGLE_API_KEY");
        assert_eq!(spec.supported_models.len(), 1);
        assert!(spec.base_url.is_some());
    }
}
