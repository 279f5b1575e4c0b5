//! Directory of configured clients.
//!
//! The registry resolves `provider` or `provider/model` selectors to
//! client instances, validating models against each provider's declared
//! capabilities. Clients are created lazily on first resolution — API key
//! from the provider's environment variable, middleware inherited from
//! the registry defaults — and cached for the life of the registry; two
//! resolutions of the same normalized selector return the same instance.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::{Client, ClientConfig};
use crate::error::ClientError;
use crate::middleware::Middleware;

fn default_registry_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Static description of one provider the registry can build clients for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Factory type: "openai", "anthropic", "gemini", or a registered
    /// custom type
    #[serde(rename = "type")]
    pub provider_type: String,
    /// Environment variable holding the API key
    pub env_var: String,
    /// Model used when the selector names none
    pub default_model: String,
    /// Allowed models; empty means unrestricted
    #[serde(default)]
    pub supported_models: Vec<String>,
    /// Endpoint override
    #[serde(default)]
    pub base_url: Option<String>,
    /// Middleware appended after the registry defaults
    #[serde(skip)]
    pub middleware: Vec<Middleware>,
}

impl ProviderSpec {
    pub fn new(
        provider_type: impl Into<String>,
        env_var: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            provider_type: provider_type.into(),
            env_var: env_var.into(),
            default_model: default_model.into(),
            supported_models: Vec::new(),
            base_url: None,
            middleware: Vec::new(),
        }
    }

    pub fn with_supported_models(mut self, models: Vec<String>) -> Self {
        self.supported_models = models;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_middleware(mut self, middleware: Vec<Middleware>) -> Self {
        self.middleware = middleware;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Provider name → spec
    pub providers: HashMap<String, ProviderSpec>,
    /// Provider used by `get_default_client`
    pub default_provider: String,
    /// Transport timeout applied to every created client
    #[serde(
        default = "default_registry_timeout",
        with = "crate::common::duration_serde"
    )]
    pub default_timeout: Duration,
    /// Middleware prepended to every created client's chain
    #[serde(skip)]
    pub default_middleware: Vec<Middleware>,
}

#[derive(Debug)]
pub struct Registry {
    config: RwLock<RegistryConfig>,
    clients: RwLock<HashMap<String, Arc<Client>>>,
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Result<Self, ClientError> {
        if !config.default_provider.is_empty()
            && !config.providers.contains_key(&config.default_provider)
        {
            return Err(ClientError::Configuration {
                message: format!(
                    "default provider {:?} is not among the configured providers",
                    config.default_provider
                ),
            });
        }
        Ok(Self {
            config: RwLock::new(config),
            clients: RwLock::new(HashMap::new()),
        })
    }

    /// Resolve `selector` (`provider` or `provider/model`) to a client,
    /// creating and caching it on first use.
    pub fn get_client(&self, selector: &str) -> Result<Arc<Client>, ClientError> {
        if selector.is_empty() {
            return Err(ClientError::EmptySelector);
        }

        let (provider, selector_model) = match selector.split_once('/') {
            Some((provider, model)) => (provider, Some(model)),
            None => (selector, None),
        };

        // Snapshot everything needed for creation before touching the
        // client cache, so the two locks are never held together.
        let (spec, default_timeout, default_middleware) = {
            let config = self.config.read().expect("registry config poisoned");
            let spec = config
                .providers
                .get(provider)
                .cloned()
                .ok_or_else(|| ClientError::UnknownProvider {
                    name: provider.to_string(),
                })?;
            (
                spec,
                config.default_timeout,
                config.default_middleware.clone(),
            )
        };

        let model = match selector_model {
            Some(model) if !model.is_empty() => model.to_string(),
            _ => spec.default_model.clone(),
        };
        if !spec.supported_models.is_empty()
            && !spec.supported_models.iter().any(|m| m == &model)
        {
            return Err(ClientError::InvalidModel {
                model,
                supported: spec.supported_models.clone(),
            });
        }

        let key = format!("{provider}/{model}");
        if let Some(client) = self
            .clients
            .read()
            .expect("registry cache poisoned")
            .get(&key)
        {
            return Ok(client.clone());
        }

        let mut clients = self.clients.write().expect("registry cache poisoned");
        // Re-check under the write lock so a racing creator wins exactly once.
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let client = Arc::new(build_client(
            provider,
            &spec,
            &model,
            default_timeout,
            default_middleware,
        )?);
        clients.insert(key, client.clone());
        Ok(client)
    }

    /// Resolve the configured default provider with its default model.
    pub fn get_default_client(&self) -> Result<Arc<Client>, ClientError> {
        let default_provider = {
            let config = self.config.read().expect("registry config poisoned");
            config.default_provider.clone()
        };
        if default_provider.is_empty() {
            return Err(ClientError::Configuration {
                message: "no default provider configured".to_string(),
            });
        }
        self.get_client(&default_provider)
    }

    /// Pre-populate the cache with a client built from an explicit config,
    /// bypassing environment lookup. Used for custom overrides.
    pub fn register_client(
        &self,
        selector: &str,
        mut config: ClientConfig,
    ) -> Result<Arc<Client>, ClientError> {
        if selector.is_empty() {
            return Err(ClientError::EmptySelector);
        }
        let (provider, selector_model) = match selector.split_once('/') {
            Some((provider, model)) => (provider, Some(model)),
            None => (selector, None),
        };

        if let Some(model) = selector_model {
            if !model.is_empty() {
                config.model = model.to_string();
            }
        }

        // A configured provider entry decides the factory type; otherwise
        // the selector's provider segment is taken as the type itself.
        let provider_type = {
            let registry_config = self.config.read().expect("registry config poisoned");
            registry_config
                .providers
                .get(provider)
                .map(|spec| spec.provider_type.clone())
                .unwrap_or_else(|| provider.to_string())
        };

        let key = format!("{provider}/{}", config.model);
        let client = Arc::new(Client::new(&provider_type, config)?);
        self.clients
            .write()
            .expect("registry cache poisoned")
            .insert(key, client.clone());
        Ok(client)
    }

    /// Eagerly construct a client for every provider whose environment
    /// variable is set. Fails only when the default provider's variable is
    /// missing; other providers are skipped with a log line.
    pub fn initialize_providers(&self) -> Result<(), ClientError> {
        let (provider_names, default_provider) = {
            let config = self.config.read().expect("registry config poisoned");
            let names: Vec<(String, String)> = config
                .providers
                .iter()
                .map(|(name, spec)| (name.clone(), spec.env_var.clone()))
                .collect();
            (names, config.default_provider.clone())
        };

        for (name, env_var) in provider_names {
            let has_key = std::env::var(&env_var).map_or(false, |v| !v.is_empty());
            if !has_key {
                if name == default_provider {
                    return Err(ClientError::Configuration {
                        message: format!(
                            "environment variable {env_var} for default provider {name} is not set"
                        ),
                    });
                }
                tracing::debug!(provider = %name, env_var, "skipping provider without API key");
                continue;
            }
            if let Err(err) = self.get_client(&name) {
                tracing::warn!(provider = %name, error = %err, "failed to initialize provider");
            }
        }
        Ok(())
    }

    /// Provider names with at least one cached client, sorted.
    pub fn registered_providers(&self) -> Vec<String> {
        let clients = self.clients.read().expect("registry cache poisoned");
        let mut providers: Vec<String> = clients
            .keys()
            .filter_map(|key| key.split('/').next())
            .map(str::to_owned)
            .collect();
        providers.sort();
        providers.dedup();
        providers
    }

    /// Replace the default middleware applied to clients created from now
    /// on. Already-cached clients keep their chains.
    pub fn update_default_middleware(&self, middleware: Vec<Middleware>) {
        self.config
            .write()
            .expect("registry config poisoned")
            .default_middleware = middleware;
    }

    /// Replace the timeout applied to clients created from now on.
    pub fn set_default_timeout(&self, timeout: Duration) {
        self.config
            .write()
            .expect("registry config poisoned")
            .default_timeout = timeout;
    }
}

fn build_client(
    provider: &str,
    spec: &ProviderSpec,
    model: &str,
    default_timeout: Duration,
    default_middleware: Vec<Middleware>,
) -> Result<Client, ClientError> {
    let api_key = std::env::var(&spec.env_var)
        .ok()
        .filter(|key| !key.is_empty())
        .ok_or_else(|| ClientError::Configuration {
            message: format!(
                "environment variable {} for provider {provider} is not set",
                spec.env_var
            ),
        })?;

    let mut middleware = default_middleware;
    middleware.extend(spec.middleware.iter().cloned());

    let mut config = ClientConfig::new(api_key, model)
        .with_timeout(default_timeout)
        .with_middleware(middleware);
    config.base_url = spec.base_url.clone();

    Client::new(&spec.provider_type, config)
}
