//! Shared HTTP plumbing for vendor adapters.
//!
//! Wraps a configured `reqwest::Client` with a base URL, default headers,
//! and an authentication strategy, and centralizes the translation of
//! non-2xx responses and transport failures into classified
//! [`ProviderError`](crate::error::ProviderError)s.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ClientError, ErrorKind, ProviderError};

#[derive(Clone, Debug)]
pub enum AuthStrategy {
    Bearer { token: String },
    Header { name: String, value: String },
    None,
}

#[derive(Clone)]
pub struct HttpProviderClient {
    provider: String,
    http: Client,
    base_url: String,
    default_headers: HeaderMap,
}

impl HttpProviderClient {
    pub fn new(
        provider: &str,
        timeout: Duration,
        base_url: Option<String>,
        default_base: &str,
        auth: AuthStrategy,
    ) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Configuration {
                message: format!("failed to create HTTP client: {e}"),
            })?;

        let mut default_headers = HeaderMap::new();
        match auth {
            AuthStrategy::Bearer { token } => {
                let value = parse_header_value(provider, &format!("Bearer {token}"))?;
                default_headers.insert("Authorization", value);
            }
            AuthStrategy::Header { name, value } => {
                let name = name
                    .parse::<HeaderName>()
                    .map_err(|e| ClientError::Configuration {
                        message: format!("invalid auth header name for {provider}: {e}"),
                    })?;
                default_headers.insert(name, parse_header_value(provider, &value)?);
            }
            AuthStrategy::None => {}
        }

        let base_url = base_url.unwrap_or_else(|| default_base.to_string());

        Ok(Self {
            provider: provider.to_string(),
            http,
            base_url,
            default_headers,
        })
    }

    /// Add a default header sent with every request.
    pub fn with_header(mut self, name: &'static str, value: &str) -> Result<Self, ClientError> {
        let value = parse_header_value(&self.provider, value)?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    fn build_url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url.trim_end_matches('/'), path)
        } else {
            format!("{}/{}", self.base_url.trim_end_matches('/'), path)
        }
    }

    pub async fn post_json<TReq: Serialize, TResp: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TResp, ClientError> {
        let url = self.build_url(path);
        let resp = self
            .http
            .request(Method::POST, url)
            .headers(self.default_headers.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(&self.provider, e))?;

        if !resp.status().is_success() {
            return Err(map_error_response(&self.provider, resp).await.into());
        }
        resp.json::<TResp>()
            .await
            .map_err(|e| ProviderError::from_transport(&self.provider, e).into())
    }
}

fn parse_header_value(provider: &str, value: &str) -> Result<HeaderValue, ClientError> {
    value.parse().map_err(|_| ClientError::Configuration {
        message: format!("credential for {provider} contains invalid header characters"),
    })
}

/// Translate a non-2xx response into a classified provider error.
///
/// Pulls a message out of the common `{"error": {"message": ...}}` shapes
/// and upgrades the classification to `content_policy` when the vendor's
/// error code says so.
pub async fn map_error_response(provider: &str, resp: Response) -> ProviderError {
    let status = resp.status().as_u16();
    match resp.text().await {
        Ok(body) => {
            let parsed = serde_json::from_str::<serde_json::Value>(&body).ok();
            let error_obj = parsed.as_ref().and_then(|v| v.get("error"));

            let message = error_obj
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .or_else(|| error_obj.and_then(|e| e.as_str()))
                .map(str::to_owned)
                .unwrap_or_else(|| body.clone());

            let code = error_obj
                .and_then(|e| e.get("code").or_else(|| e.get("type")))
                .and_then(|c| c.as_str())
                .unwrap_or_default();

            let mut err = ProviderError::from_status(provider, status, message);
            if code.contains("content_policy") || code.contains("content_filter") {
                err.kind = ErrorKind::ContentPolicy;
            }
            err
        }
        Err(_) => ProviderError::from_status(provider, status, "failed to read error response"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> HttpProviderClient {
        HttpProviderClient::new(
            "testvendor",
            Duration::from_secs(5),
            Some(server.uri()),
            "https://unused.example.com",
            AuthStrategy::Bearer {
                token: "sk-test".to_string(),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_error_body_message_is_extracted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/things"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"message": "slow down", "type": "rate_limit_error"}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .post_json::<_, serde_json::Value>("/v1/things", &json!({}))
            .await
            .unwrap_err();

        match err {
            ClientError::Provider(p) => {
                assert_eq!(p.kind, ErrorKind::RateLimit);
                assert_eq!(p.status_code, Some(429));
                assert!(p.message.contains("slow down"));
            }
            other => panic!("expected provider error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_content_policy_code_overrides_status_classification() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/things"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"message": "refused", "code": "content_policy_violation"}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .post_json::<_, serde_json::Value>("/v1/things", &json!({}))
            .await
            .unwrap_err();

        match err {
            ClientError::Provider(p) => assert_eq!(p.kind, ErrorKind::ContentPolicy),
            other => panic!("expected provider error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_non_json_error_body_falls_through() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/things"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream sad"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .post_json::<_, serde_json::Value>("/v1/things", &json!({}))
            .await
            .unwrap_err();

        match err {
            ClientError::Provider(p) => {
                assert_eq!(p.kind, ErrorKind::ServerError);
                assert!(p.message.contains("upstream sad"));
            }
            other => panic!("expected provider error, got {other}"),
        }
    }
}
