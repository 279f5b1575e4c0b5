//! Provider abstraction and factories.
//!
//! A [`Provider`] is a thin adapter over one vendor API: it turns a prompt
//! plus parsed options into a single round-trip and reports the completion
//! text and token counts. Providers are stateless beyond their credentials
//! and current model; every cross-cutting behavior lives in middleware.
//!
//! Builtin adapters cover OpenAI-compatible endpoints, Anthropic, and
//! Google Gemini. Additional provider types can be installed process-wide
//! with [`register_provider_factory`]; registration must complete before
//! clients or registries are constructed.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::client::ClientConfig;
use crate::context::RequestContext;
use crate::error::ClientError;
use crate::models::{Completion, OptionMap};

pub mod anthropic;
pub mod gemini;
pub mod http_client;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

/// A single-vendor adapter.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// One vendor round-trip. On success the completion text is non-empty
    /// and token counts are filled, estimating locally when the vendor
    /// omits usage.
    async fn do_request(
        &self,
        ctx: &RequestContext,
        prompt: &str,
        options: Option<&OptionMap>,
    ) -> Result<Completion, ClientError>;

    /// Current model identifier.
    fn model(&self) -> String;

    /// Replace the model. Safe to call concurrently with `do_request`;
    /// in-flight requests keep the snapshot they read.
    fn set_model(&self, model: &str);
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider").field("model", &self.model()).finish()
    }
}

/// Fill token counts the vendor omitted with local estimates.
///
/// Vendor-reported counts win; zero or missing counts are estimated from
/// the prompt and completion text. Best effort, not a contract.
pub(crate) fn usage_or_estimate(
    reported_in: Option<u32>,
    reported_out: Option<u32>,
    prompt: &str,
    text: &str,
    estimator: &dyn crate::tokens::TokenEstimator,
) -> (u32, u32) {
    let tokens_in = match reported_in {
        Some(n) if n > 0 => n,
        _ => estimator.estimate(prompt),
    };
    let tokens_out = match reported_out {
        Some(n) if n > 0 => n,
        _ => estimator.estimate(text),
    };
    (tokens_in, tokens_out)
}

/// Constructor for a provider type. Must be cheap and synchronous; no I/O.
pub type ProviderFactory =
    Arc<dyn Fn(&ClientConfig) -> Result<Arc<dyn Provider>, ClientError> + Send + Sync>;

static FACTORIES: OnceLock<RwLock<HashMap<String, ProviderFactory>>> = OnceLock::new();

fn factories() -> &'static RwLock<HashMap<String, ProviderFactory>> {
    FACTORIES.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Install a factory for a non-builtin provider type.
///
/// The table is process-global and intended to be populated once during
/// startup, before any client or registry is built. A second registration
/// for the same name replaces the first.
pub fn register_provider_factory(name: impl Into<String>, factory: ProviderFactory) {
    factories()
        .write()
        .expect("provider factory table poisoned")
        .insert(name.into(), factory);
}

/// Construct a provider for `provider_type` from validated configuration.
pub fn create_provider(
    provider_type: &str,
    config: &ClientConfig,
) -> Result<Arc<dyn Provider>, ClientError> {
    match provider_type {
        "openai" => Ok(Arc::new(OpenAiProvider::new(config)?)),
        "anthropic" => Ok(Arc::new(AnthropicProvider::new(config)?)),
        "gemini" => Ok(Arc::new(GeminiProvider::new(config)?)),
        other => {
            let factory = factories()
                .read()
                .expect("provider factory table poisoned")
                .get(other)
                .cloned();
            match factory {
                Some(factory) => factory(config),
                None => Err(ClientError::Configuration {
                    message: format!("no provider factory registered for type {other:?}"),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;

    #[test]
    fn test_unknown_type_is_a_configuration_error() {
        let config = ClientConfig::new("key", "model");
        let err = create_provider("no-such-vendor", &config).unwrap_err();
        assert!(matches!(err, ClientError::Configuration { .. }));
    }

    #[test]
    fn test_registered_factory_is_consulted() {
        struct Fixed;
        #[async_trait::async_trait]
        impl Provider for Fixed {
            async fn do_request(
                &self,
                _ctx: &RequestContext,
                _prompt: &str,
                _options: Option<&OptionMap>,
            ) -> Result<Completion, ClientError> {
                Ok(Completion {
                    text: "fixed".to_string(),
                    tokens_in: 1,
                    tokens_out: 1,
                })
            }
            fn model(&self) -> String {
                "fixed-model".to_string()
            }
            fn set_model(&self, _model: &str) {}
        }

        let factory: ProviderFactory =
            Arc::new(|_config| Ok::<Arc<dyn Provider>, ClientError>(Arc::new(Fixed)));
        register_provider_factory("fixture-vendor", factory);
        let config = ClientConfig::new("key", "fixed-model");
        let provider = create_provider("fixture-vendor", &config).unwrap();
        assert_eq!(provider.model(), "fixed-model");
    }
}
