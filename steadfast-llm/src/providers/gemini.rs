//! Google Gemini generateContent adapter.
//!
//! API-key authentication only; the model name is part of the request
//! path, so each request reads one model snapshot and builds its URL from
//! it.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use super::http_client::{AuthStrategy, HttpProviderClient};
use super::{usage_or_estimate, Provider};
use crate::client::ClientConfig;
use crate::context::RequestContext;
use crate::error::ClientError;
use crate::models::{Completion, OptionMap, RequestOptions};
use crate::tokens::CharEstimator;

const PROVIDER: &str = "gemini";
const DEFAULT_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    http: HttpProviderClient,
    model: RwLock<String>,
    estimator: CharEstimator,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

impl GeminiProvider {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let http = HttpProviderClient::new(
            PROVIDER,
            config.timeout,
            config.base_url.clone(),
            DEFAULT_BASE,
            AuthStrategy::Header {
                name: "x-goog-api-key".to_string(),
                value: config.api_key.clone(),
            },
        )?;

        Ok(Self {
            http,
            model: RwLock::new(config.model.clone()),
            estimator: CharEstimator::default(),
        })
    }

    fn build_request(&self, prompt: &str, opts: &RequestOptions) -> GenerateContentRequest {
        let generation_config = GenerationConfig {
            temperature: opts.temperature,
            top_p: opts.top_p,
            top_k: opts.extra_i64("top_k", 1, 40),
            max_output_tokens: opts.max_tokens,
        };
        let has_config = generation_config.temperature.is_some()
            || generation_config.top_p.is_some()
            || generation_config.top_k.is_some()
            || generation_config.max_output_tokens.is_some();

        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            system_instruction: opts.system.as_ref().map(|system| Content {
                role: None,
                parts: vec![Part {
                    text: system.clone(),
                }],
            }),
            generation_config: has_config.then_some(generation_config),
        }
    }
}

#[async_trait::async_trait]
impl Provider for GeminiProvider {
    async fn do_request(
        &self,
        ctx: &RequestContext,
        prompt: &str,
        options: Option<&OptionMap>,
    ) -> Result<Completion, ClientError> {
        let opts = RequestOptions::from_map(options);
        let model = opts.model.clone().unwrap_or_else(|| self.model());
        let request = self.build_request(prompt, &opts);

        let path = format!("models/{model}:generateContent");
        let response: GenerateContentResponse = ctx
            .run(PROVIDER, self.http.post_json(&path, &request))
            .await?;

        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or(ClientError::NoResponseChoice)?;
        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(ClientError::EmptyResponse);
        }

        let (tokens_in, tokens_out) = usage_or_estimate(
            response.usage_metadata.as_ref().map(|u| u.prompt_token_count),
            response
                .usage_metadata
                .as_ref()
                .map(|u| u.candidates_token_count),
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> GeminiProvider {
        let config =
            ClientConfig::new("goog-test", "gemini-1.5-pro").with_base_url(server.uri());
        GeminiProvider::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_success_maps_candidate_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-1.5-pro:generateContent"))
            .and(header("x-goog-api-key", "goog-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [
                    {"content": {"parts": [{"text": "answer"}], "role": "model"}}
                ],
                "usageMetadata": {"promptTokenCount": 9, "candidatesTokenCount": 2}
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let out = provider
            .do_request(&RequestContext::new(), "question", None)
            .await
            .unwrap();
        assert_eq!(out.text, "answer");
        assert_eq!(out.tokens_in, 9);
        assert_eq!(out.tokens_out, 2);
    }

    #[tokio::test]
    async fn test_generation_config_carries_clamped_top_k() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-1.5-pro:generateContent"))
            .and(body_partial_json(json!({
                "generationConfig": {"topK": 40, "maxOutputTokens": 64}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "ok"}]}}],
                "usageMetadata": {"promptTokenCount": 1, "candidatesTokenCount": 1}
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let options: OptionMap = [
            ("top_k".to_string(), json!(500)),
            ("max_tokens".to_string(), json!(64)),
        ]
        .into_iter()
        .collect();
        let out = provider
            .do_request(&RequestContext::new(), "question", Some(&options))
            .await
            .unwrap();
        assert_eq!(out.text, "ok");
    }

    #[tokio::test]
    async fn test_no_candidates_is_no_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-1.5-pro:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": []
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider
            .do_request(&RequestContext::new(), "question", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NoResponseChoice));
    }
}
