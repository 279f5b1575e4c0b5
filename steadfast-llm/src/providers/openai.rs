//! OpenAI-compatible chat completions adapter.
//!
//! Speaks the `/v1/chat/completions` wire format with Bearer
//! authentication, which also covers the many vendors that expose
//! OpenAI-compatible endpoints behind a custom base URL.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use super::http_client::{AuthStrategy, HttpProviderClient};
use super::{usage_or_estimate, Provider};
use crate::client::ClientConfig;
use crate::context::RequestContext;
use crate::error::ClientError;
use crate::models::{Completion, OptionMap, RequestOptions};
use crate::tokens::CharEstimator;

const PROVIDER: &str = "openai";
const DEFAULT_BASE: &str = "https://api.openai.com";

pub struct OpenAiProvider {
    http: HttpProviderClient,
    model: RwLock<String>,
    estimator: CharEstimator,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl OpenAiProvider {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let http = HttpProviderClient::new(
            PROVIDER,
            config.timeout,
            config.base_url.clone(),
            DEFAULT_BASE,
            AuthStrategy::Bearer {
                token: config.api_key.clone(),
            },
        )?;

        Ok(Self {
            http,
            model: RwLock::new(config.model.clone()),
            estimator: CharEstimator::default(),
        })
    }

    fn build_request(&self, prompt: &str, opts: &RequestOptions) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &opts.system {
            messages.push(ChatMessage {
                role: "system",
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt.to_string(),
        });

        ChatCompletionRequest {
            model: opts.model.clone().unwrap_or_else(|| self.model()),
            messages,
            max_tokens: opts.max_tokens,
            temperature: opts.temperature,
            top_p: opts.top_p,
            frequency_penalty: opts.extra_f64("frequency_penalty", -2.0, 2.0).map(|v| v as f32),
            presence_penalty: opts.extra_f64("presence_penalty", -2.0, 2.0).map(|v| v as f32),
        }
    }
}

#[async_trait::async_trait]
impl Provider for OpenAiProvider {
    async fn do_request(
        &self,
        ctx: &RequestContext,
        prompt: &str,
        options: Option<&OptionMap>,
    ) -> Result<Completion, ClientError> {
        let opts = RequestOptions::from_map(options);
        let request = self.build_request(prompt, &opts);

        let response: ChatCompletionResponse = ctx
            .run(
                PROVIDER,
                self.http.post_json("/v1/chat/completions", &request),
            )
            .await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or(ClientError::NoResponseChoice)?;
        let text = choice.message.content.unwrap_or_default();
        if text.is_empty() {
            return Err(ClientError::EmptyResponse);
        }

        let (tokens_in, tokens_out) = usage_or_estimate(
            response.usage.as_ref().map(|u| u.prompt_tokens),
            response.usage.as_ref().map(|u| u.completion_tokens),
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
