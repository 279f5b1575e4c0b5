//! Anthropic messages adapter.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use super::http_client::{AuthStrategy, HttpProviderClient};
use super::{usage_or_estimate, Provider};
use crate::client::ClientConfig;
use crate::context::RequestContext;
use crate::error::ClientError;
use crate::models::{Completion, OptionMap, RequestOptions};
use crate::tokens::CharEstimator;

const PROVIDER: &str = "anthropic";
const DEFAULT_BASE: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Applied when the caller does not bound the completion; the messages
/// endpoint requires an explicit max_tokens.
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    http: HttpProviderClient,
    model: RwLock<String>,
    estimator: CharEstimator,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<MessageParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Debug, Serialize)]
struct MessageParam {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let http = HttpProviderClient::new(
            PROVIDER,
            config.timeout,
            config.base_url.clone(),
            DEFAULT_BASE,
            AuthStrategy::Header {
                name: "x-api-key".to_string(),
                value: config.api_key.clone(),
            },
        )?
        .with_header("anthropic-version", API_VERSION)?;

        Ok(Self {
            http,
            model: RwLock::new(config.model.clone()),
            estimator: CharEstimator::default(),
        })
    }

    fn build_request(&self, prompt: &str, opts: &RequestOptions) -> MessagesRequest {
        MessagesRequest {
            model: opts.model.clone().unwrap_or_else(|| self.model()),
            max_tokens: opts.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages: vec![MessageParam {
                role: "user",
                content: prompt.to_string(),
            }],
            system: opts.system.clone(),
            // Anthropic's documented range is narrower than the common one.
            temperature: opts.temperature.map(|t| t.clamp(0.0, 1.0)),
            top_p: opts.top_p,
        }
    }
}

#[async_trait::async_trait]
impl Provider for AnthropicProvider {
    async fn do_request(
        &self,
        ctx: &RequestContext,
        prompt: &str,
        options: Option<&OptionMap>,
    ) -> Result<Completion, ClientError> {
        let opts = RequestOptions::from_map(options);
        let request = self.build_request(prompt, &opts);

        let response: MessagesResponse = ctx
            .run(PROVIDER, self.http.post_json("/v1/messages", &request))
            .await?;

        if response.content.is_empty() {
            return Err(ClientError::NoResponseChoice);
        }
        let text: String = response
            .content
            .into_iter()
            .map(|block| block.text)
            .collect();
        if text.is_empty() {
            return Err(ClientError::EmptyResponse);
        }

        let (tokens_in, tokens_out) = usage_or_estimate(
            response.usage.as_ref().map(|u| u.input_tokens),
            response.usage.as_ref().map(|u| u.output_tokens),
            prompt,
            &text,
            &self.estimator,
        );

        Ok(Completion {
            text,
            tokens_in,
            tokens_out,
        })
    }

    fn model(&self) -> String {
        self.model.read().expect("model lock poisoned").clone()
    }

    fn set_model(&self, model: &str) {
        *self.model.write().expect("model lock poisoned") = model.to_string();
    }
}
