//! The user-facing client: a provider wrapped in its middleware chain,
//! plus a local token estimator.

use std::sync::Arc;
use std::time::Duration;

use crate::context::RequestContext;
use crate::error::ClientError;
use crate::middleware::{build_chain, Middleware};
use crate::models::{Completion, OptionMap};
use crate::providers::{create_provider, Provider};
use crate::tokens::{CachingEstimator, CharEstimator, TokenEstimator};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Entries the default estimator memoizes before evicting.
const ESTIMATOR_CACHE_SIZE: usize = 1024;

/// Configuration for a single client.
#[derive(Clone)]
pub struct ClientConfig {
    /// Vendor API key; must be non-empty
    pub api_key: String,
    /// Initial model identifier; must be non-empty
    pub model: String,
    /// Override for the vendor endpoint; http/https with a host
    pub base_url: Option<String>,
    /// Transport-level request timeout
    pub timeout: Duration,
    /// Ordered middleware list, first entry outermost
    pub middleware: Vec<Middleware>,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            middleware: Vec::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_middleware(mut self, middleware: Vec<Middleware>) -> Self {
        self.middleware = middleware;
        self
    }
}

/// A provider composed with its middleware chain.
///
/// Cheap to share: clone the `Arc` it is usually held in. All state
/// (breaker counters, bucket tokens) lives inside the chain and is scoped
/// to this client.
pub struct Client {
    chain: Arc<dyn Provider>,
    estimator: Arc<dyn TokenEstimator>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Build a client for `provider_type` ("openai", "anthropic",
    /// "gemini", or a registered custom type) with the default estimator.
    pub fn new(provider_type: &str, config: ClientConfig) -> Result<Self, ClientError> {
        Self::with_estimator(
            provider_type,
            config,
            Arc::new(CachingEstimator::new(
                CharEstimator::default(),
                ESTIMATOR_CACHE_SIZE,
            )),
        )
    }

    /// Build a client with a caller-provided token estimator.
    pub fn with_estimator(
        provider_type: &str,
        config: ClientConfig,
        estimator: Arc<dyn TokenEstimator>,
    ) -> Result<Self, ClientError> {
        if config.api_key.is_empty() {
            return Err(ClientError::EmptyApiKey);
        }
        if config.model.is_empty() {
            return Err(ClientError::Configuration {
                message: "model must not be empty".to_string(),
            });
        }
        if let Some(base_url) = &config.base_url {
            validate_base_url(base_url)?;
        }

        let provider = create_provider(provider_type, &config)?;
        let chain = build_chain(&config.middleware, provider);
        Ok(Self { chain, estimator })
    }

    pub fn builder(provider_type: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(provider_type)
    }

    /// Complete `prompt`, discarding usage.
    pub async fn complete(
        &self,
        ctx: &RequestContext,
        prompt: &str,
        options: Option<&OptionMap>,
    ) -> Result<String, ClientError> {
        Ok(self.complete_with_usage(ctx, prompt, options).await?.text)
    }

    /// Complete `prompt` through the full middleware chain, returning the
    /// text and token counts.
    pub async fn complete_with_usage(
        &self,
        ctx: &RequestContext,
        prompt: &str,
        options: Option<&OptionMap>,
    ) -> Result<Completion, ClientError> {
        self.chain.do_request(ctx, prompt, options).await
    }

    /// Local token estimate; never calls the vendor.
    pub fn estimate_tokens(&self, text: &str) -> u32 {
        self.estimator.estimate(text)
    }

    /// Current model, read through the chain.
    pub fn model(&self) -> String {
        self.chain.model()
    }

    /// Replace the model for subsequent requests.
    pub fn set_model(&self, model: &str) {
        self.chain.set_model(model);
    }
}

/// Builder-style construction mirroring [`ClientConfig`].
pub struct ClientBuilder {
    provider_type: String,
    config: ClientConfig,
    estimator: Option<Arc<dyn TokenEstimator>>,
}

impl ClientBuilder {
    fn new(provider_type: impl Into<String>) -> Self {
        Self {
            provider_type: provider_type.into(),
            config: ClientConfig::new("", ""),
            estimator: None,
        }
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config.api_key = api_key.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = Some(base_url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn middleware(mut self, middleware: Vec<Middleware>) -> Self {
        self.config.middleware = middleware;
        self
    }

    pub fn push_middleware(mut self, middleware: Middleware) -> Self {
        self.config.middleware.push(middleware);
        self
    }

    pub fn estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn build(self) -> Result<Client, ClientError> {
        match self.estimator {
            Some(estimator) => Client::with_estimator(&self.provider_type, self.config, estimator),
            None => Client::new(&self.provider_type, self.config),
        }
    }
}

fn validate_base_url(base_url: &str) -> Result<(), ClientError> {
    let parsed = reqwest::Url::parse(base_url).map_err(|e| ClientError::Configuration {
        message: format!("invalid base URL {base_url:?}: {e}"),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ClientError::Configuration {
            message: format!("base URL {base_url:?} must use http or https"),
        });
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(ClientError::Configuration {
            message: format!("base URL {base_url:?} is missing a host"),
        });
    }
    Ok(())
}
