//! Error types for the steadfast client.
//!
//! Two layers mirror the two halves of the pipeline:
//!
//! - [`ProviderError`] is the structured error produced at the provider
//!   boundary. It carries the provider name, a stable [`ErrorKind`]
//!   classification, the HTTP status code when one was observed, and the
//!   wrapped cause.
//! - [`ClientError`] is the caller-facing taxonomy. It wraps provider
//!   errors, adds the sentinel values the middleware chain branches on
//!   (circuit-open, empty response, ...), configuration errors, and the
//!   retry-exhaustion composite.
//!
//! Sentinels are unit-style variants so middleware can branch with
//! `matches!` instead of string inspection. Composite errors preserve
//! `std::error::Error::source` so callers can recover the underlying
//! classification after retries are exhausted.

use std::fmt;
use thiserror::Error;

/// Message fragments that mark an unclassified error as transient.
///
/// Used only when no [`ProviderError`] classification is available.
const TRANSIENT_PHRASES: &[&str] = &[
    "rate limit",
    "timeout",
    "connection refused",
    "connection reset",
    "temporary",
    "service unavailable",
    "internal server error",
    "bad gateway",
    "gateway timeout",
    "network",
];

/// Stable classification of provider failures.
///
/// The `as_str` form doubles as the metrics label value, so the strings
/// here are part of the crate's observable surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid or rejected credentials (401/403)
    Authentication,
    /// Provider-side rate limiting (429)
    RateLimit,
    /// Malformed request (400 and unrecognized 4xx)
    BadRequest,
    /// Unknown model or endpoint (404)
    NotFound,
    /// Provider-side failure (5xx)
    ServerError,
    /// Request refused by the provider's content policy
    ContentPolicy,
    /// Connection-level failure, including cancellation
    Network,
    /// Deadline expiry, either local or provider-side
    Timeout,
    /// Anything that could not be classified
    Unknown,
}

impl ErrorKind {
    /// Classify an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Authentication,
            429 => Self::RateLimit,
            404 => Self::NotFound,
            400..=499 => Self::BadRequest,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Whether a failure of this kind may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::ServerError | Self::Network | Self::Timeout
        )
    }

    /// Stable string form, used as the `error_type` metrics label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::RateLimit => "rate_limit",
            Self::BadRequest => "bad_request",
            Self::NotFound => "not_found",
            Self::ServerError => "server_error",
            Self::ContentPolicy => "content_policy",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure from a provider round-trip.
#[derive(Debug)]
pub struct ProviderError {
    /// Provider that produced the failure
    pub provider: String,
    /// Classification driving retry and metrics behavior
    pub kind: ErrorKind,
    /// HTTP status code, when one was observed
    pub status_code: Option<u16>,
    /// Human-readable description
    pub message: String,
    /// Wrapped cause, when one exists
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    pub fn new(
        provider: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            kind,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Build from an HTTP status code, classifying it along the way.
    pub fn from_status(
        provider: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            kind: ErrorKind::from_status(status),
            status_code: Some(status),
            message: message.into(),
            source: None,
        }
    }

    /// Classify a transport-level reqwest failure.
    pub fn from_transport(provider: impl Into<String>, err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else if err.is_connect() || err.is_request() {
            ErrorKind::Network
        } else if let Some(status) = err.status() {
            ErrorKind::from_status(status.as_u16())
        } else {
            ErrorKind::Unknown
        };
        Self {
            provider: provider.into(),
            kind,
            status_code: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// The error reported when a request context is canceled.
    pub fn canceled(provider: impl Into<String>) -> Self {
        Self::new(provider, ErrorKind::Network, "request canceled")
    }

    /// The error reported when a request deadline expires.
    pub fn deadline_exceeded(provider: impl Into<String>) -> Self {
        Self::new(provider, ErrorKind::Timeout, "deadline exceeded")
    }

    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Whether this failure may succeed on a later attempt.
    pub fn retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(
                f,
                "{} error ({}, status {}): {}",
                self.provider, self.kind, code, self.message
            ),
            None => write!(f, "{} error ({}): {}", self.provider, self.kind, self.message),
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Caller-facing error taxonomy.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Classified provider failure
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The circuit breaker refused the request without calling the provider
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// An API key was required but empty
    #[error("API key must not be empty")]
    EmptyApiKey,

    /// The provider returned a response with no text
    #[error("provider returned an empty response")]
    EmptyResponse,

    /// The provider response contained no choices or candidates
    #[error("provider response contained no choices")]
    NoResponseChoice,

    /// The requested model is not in the provider's supported set
    #[error("model {model:?} is not supported; supported models: [{}]", .supported.join(", "))]
    InvalidModel {
        model: String,
        supported: Vec<String>,
    },

    /// An empty selector was passed where a provider/model was expected
    #[error("selector must not be empty; use get_default_client for the default provider")]
    EmptySelector,

    /// The selector named a provider the registry does not know
    #[error("unknown provider {name:?}")]
    UnknownProvider { name: String },

    /// Invalid or missing configuration
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Retry budget exhausted; wraps the last attempt's failure
    #[error("request failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<ClientError>,
    },
}

impl ClientError {
    /// Whether the retry governor may attempt this request again.
    ///
    /// A [`ProviderError`] decides via its classification; `CircuitOpen`
    /// and exhausted composites never retry; anything else falls back to a
    /// case-insensitive substring match against the transient allowlist.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.retryable(),
            Self::CircuitOpen | Self::RetriesExhausted { .. } => false,
            other => message_is_transient(&other.to_string()),
        }
    }

    /// The `status` metrics label for a request that ended with this error.
    pub fn status_label(&self) -> &'static str {
        match self {
            Self::CircuitOpen => "circuit_open",
            Self::Provider(e) if e.kind == ErrorKind::Timeout => "timeout",
            Self::RetriesExhausted { source, .. } => source.status_label(),
            _ => "error",
        }
    }
}

/// Case-insensitive transient-phrase match for unclassified errors.
pub fn message_is_transient(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    TRANSIENT_PHRASES.iter().any(|p| lower.contains(p))
}
