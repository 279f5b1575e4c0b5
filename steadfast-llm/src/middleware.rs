//! Middleware composition over the provider contract.
//!
//! A middleware is a decorator: it wraps a `Arc<dyn Provider>` and returns
//! another one, adding a single cross-cutting behavior while preserving
//! the contract. The client folds its configured list in reverse, so the
//! first-listed middleware is outermost — it sees the request first and
//! the response last.
//!
//! The recommended order is tracing → metrics → rate limiter → circuit
//! breaker → retry → timeout → provider: observability measures end-to-end
//! including waits, the rate limiter shapes pressure before the breaker,
//! the breaker short-circuits before retries can amplify load, and each
//! retry attempt gets a fresh per-attempt deadline from the timeout layer.
//!
//! Every wrapper forwards `model`/`set_model` unchanged and forwards the
//! caller's context as-is or with a tighter deadline, never a looser one.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::Instrument;
use uuid::Uuid;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerHook};
use crate::context::RequestContext;
use crate::error::ClientError;
use crate::metrics::{
    provider_from_model, MetricsCollector, METRIC_LATENCY_SECONDS, METRIC_REQUESTS_TOTAL,
    METRIC_TOKENS_TOTAL,
};
use crate::models::{Completion, OptionMap};
use crate::providers::Provider;
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::retry::RetryPolicy;

/// One configured middleware. Applying it with [`Middleware::wrap`]
/// creates fresh per-chain state (bucket tokens, breaker counters), so a
/// shared default list never shares state between clients.
#[derive(Clone)]
pub enum Middleware {
    /// Span per request with model, prompt length, token counts, status
    Tracing { service_name: String },
    /// Latency/request/token metrics; `None` is tolerated and passes through
    Metrics(Option<Arc<dyn MetricsCollector>>),
    /// Token-bucket admission ahead of everything downstream
    RateLimit(RateLimitConfig),
    /// Fail-fast protection for the downstream provider
    CircuitBreaker {
        config: CircuitBreakerConfig,
        hook: Option<Arc<dyn CircuitBreakerHook>>,
    },
    /// Bounded exponential backoff over transient failures
    Retry(RetryPolicy),
    /// Per-attempt deadline
    Timeout(Duration),
}

impl Middleware {
    pub fn tracing(service_name: impl Into<String>) -> Self {
        Self::Tracing {
            service_name: service_name.into(),
        }
    }

    pub fn metrics(collector: Arc<dyn MetricsCollector>) -> Self {
        Self::Metrics(Some(collector))
    }

    pub fn circuit_breaker(config: CircuitBreakerConfig) -> Self {
        Self::CircuitBreaker { config, hook: None }
    }

    pub fn circuit_breaker_with_hook(
        config: CircuitBreakerConfig,
        hook: Arc<dyn CircuitBreakerHook>,
    ) -> Self {
        Self::CircuitBreaker {
            config,
            hook: Some(hook),
        }
    }

    /// Wrap `next`, instantiating this middleware's state.
    pub fn wrap(&self, next: Arc<dyn Provider>) -> Arc<dyn Provider> {
        match self {
            Self::Tracing { service_name } => Arc::new(TracingProvider {
                service_name: service_name.clone(),
                next,
            }),
            Self::Metrics(collector) => Arc::new(MetricsProvider {
                collector: collector.clone(),
                next,
            }),
            Self::RateLimit(config) => Arc::new(RateLimitProvider {
                limiter: RateLimiter::new(config.clone()),
                next,
            }),
            Self::CircuitBreaker { config, hook } => {
                let breaker = CircuitBreaker::new(provider_from_model(&next.model()), config.clone());
                let breaker = match hook {
                    Some(hook) => breaker.with_hook(hook.clone()),
                    None => breaker,
                };
                Arc::new(CircuitBreakerProvider { breaker, next })
            }
            Self::Retry(policy) => Arc::new(RetryProvider {
                policy: policy.clone(),
                next,
            }),
            Self::Timeout(timeout) => Arc::new(TimeoutProvider {
                timeout: *timeout,
                next,
            }),
        }
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tracing { service_name } => {
                f.debug_struct("Tracing").field("service_name", service_name).finish()
            }
            Self::Metrics(collector) => f
                .debug_tuple("Metrics")
                .field(&collector.as_ref().map(|_| "collector"))
                .finish(),
            Self::RateLimit(config) => f.debug_tuple("RateLimit").field(config).finish(),
            Self::CircuitBreaker { config, .. } => {
                f.debug_struct("CircuitBreaker").field("config", config).finish()
            }
            Self::Retry(policy) => f.debug_tuple("Retry").field(policy).finish(),
            Self::Timeout(timeout) => f.debug_tuple("Timeout").field(timeout).finish(),
        }
    }
}

/// Fold the configured list in reverse so the first entry is outermost.
pub(crate) fn build_chain(
    middleware: &[Middleware],
    provider: Arc<dyn Provider>,
) -> Arc<dyn Provider> {
    let mut chain = provider;
    for mw in middleware.iter().rev() {
        chain = mw.wrap(chain);
    }
    chain
}

/// Model label for this request: an options override wins over the chain's
/// configured model.
fn effective_model(options: Option<&OptionMap>, next: &dyn Provider) -> String {
    options
        .and_then(|map| map.get("model"))
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .unwrap_or_else(|| next.model())
}

struct TracingProvider {
    service_name: String,
    next: Arc<dyn Provider>,
}

#[async_trait::async_trait]
impl Provider for TracingProvider {
    async fn do_request(
        &self,
        ctx: &RequestContext,
        prompt: &str,
        options: Option<&OptionMap>,
    ) -> Result<Completion, ClientError> {
        let request_id = Uuid::new_v4();
        let model = effective_model(options, self.next.as_ref());
        let span = tracing::info_span!(
            "llm_request",
            service_name = %self.service_name,
            %request_id,
            model = %model,
            prompt_length = prompt.len(),
            tokens_in = tracing::field::Empty,
            tokens_out = tracing::field::Empty,
            status = tracing::field::Empty,
        );

        let result = self
            .next
            .do_request(ctx, prompt, options)
            .instrument(span.clone())
            .await;

        match &result {
            Ok(completion) => {
                span.record("tokens_in", completion.tokens_in);
                span.record("tokens_out", completion.tokens_out);
                span.record("status", "success");
            }
            Err(err) => {
                span.record("status", err.status_label());
            }
        }
        result
    }

    fn model(&self) -> String {
        self.next.model()
    }

    fn set_model(&self, model: &str) {
        self.next.set_model(model);
    }
}

struct MetricsProvider {
    collector: Option<Arc<dyn MetricsCollector>>,
    next: Arc<dyn Provider>,
}

#[async_trait::async_trait]
impl Provider for MetricsProvider {
    async fn do_request(
        &self,
        ctx: &RequestContext,
        prompt: &str,
        options: Option<&OptionMap>,
    ) -> Result<Completion, ClientError> {
        let Some(collector) = &self.collector else {
            return self.next.do_request(ctx, prompt, options).await;
        };

        let model = effective_model(options, self.next.as_ref());
        let provider = provider_from_model(&model);
        let start = Instant::now();
        let result = self.next.do_request(ctx, prompt, options).await;
        let elapsed = start.elapsed();

        let status = match &result {
            Ok(_) => "success",
            Err(err) => err.status_label(),
        };
        let labels = [
            ("provider", provider),
            ("model", model.as_str()),
            ("status", status),
        ];
        collector.record_histogram(METRIC_LATENCY_SECONDS, elapsed.as_secs_f64(), &labels);
        collector.record_counter(METRIC_REQUESTS_TOTAL, 1, &labels);

        if let Ok(completion) = &result {
            let input_labels = [
                ("provider", provider),
                ("model", model.as_str()),
                ("status", status),
                ("token_type", "input"),
            ];
            collector.record_counter(
                METRIC_TOKENS_TOTAL,
                completion.tokens_in as u64,
                &input_labels,
            );
            let output_labels = [
                ("provider", provider),
                ("model", model.as_str()),
                ("status", status),
                ("token_type", "output"),
            ];
            collector.record_counter(
                METRIC_TOKENS_TOTAL,
                completion.tokens_out as u64,
                &output_labels,
            );
        }
        result
    }

    fn model(&self) -> String {
        self.next.model()
    }

    fn set_model(&self, model: &str) {
        self.next.set_model(model);
    }
}

struct RateLimitProvider {
    limiter: RateLimiter,
    next: Arc<dyn Provider>,
}

#[async_trait::async_trait]
impl Provider for RateLimitProvider {
    async fn do_request(
        &self,
        ctx: &RequestContext,
        prompt: &str,
        options: Option<&OptionMap>,
    ) -> Result<Completion, ClientError> {
        let provider = provider_from_model(&effective_model(options, self.next.as_ref()));
        self.limiter.wait(ctx, provider).await?;
        self.next.do_request(ctx, prompt, options).await
    }

    fn model(&self) -> String {
        self.next.model()
    }

    fn set_model(&self, model: &str) {
        self.next.set_model(model);
    }
}

struct CircuitBreakerProvider {
    breaker: CircuitBreaker,
    next: Arc<dyn Provider>,
}

#[async_trait::async_trait]
impl Provider for CircuitBreakerProvider {
    async fn do_request(
        &self,
        ctx: &RequestContext,
        prompt: &str,
        options: Option<&OptionMap>,
    ) -> Result<Completion, ClientError> {
        self.breaker
            .call(self.next.do_request(ctx, prompt, options))
            .await
    }

    fn model(&self) -> String {
        self.next.model()
    }

    fn set_model(&self, model: &str) {
        self.next.set_model(model);
    }
}

struct RetryProvider {
    policy: RetryPolicy,
    next: Arc<dyn Provider>,
}

#[async_trait::async_trait]
impl Provider for RetryProvider {
    async fn do_request(
        &self,
        ctx: &RequestContext,
        prompt: &str,
        options: Option<&OptionMap>,
    ) -> Result<Completion, ClientError> {
        let provider = provider_from_model(&effective_model(options, self.next.as_ref()));
        let mut attempt: u32 = 0;

        loop {
            let err = match self.next.do_request(ctx, prompt, options).await {
                Ok(completion) => return Ok(completion),
                Err(err) => err,
            };

            // Cancellation, a tripped breaker, and non-transient failures
            // all end the loop at once.
            if ctx.done(provider).is_some()
                || matches!(err, ClientError::CircuitOpen)
                || !err.is_retryable()
            {
                return Err(err);
            }
            if attempt >= self.policy.max_retries {
                return Err(ClientError::RetriesExhausted {
                    attempts: attempt + 1,
                    source: Box::new(err),
                });
            }

            let delay = self.policy.delay_for_attempt(attempt);
            tracing::debug!(
                provider,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after transient failure"
            );
            ctx.sleep(provider, delay).await?;
            attempt += 1;
        }
    }

    fn model(&self) -> String {
        self.next.model()
    }

    fn set_model(&self, model: &str) {
        self.next.set_model(model);
    }
}

struct TimeoutProvider {
    timeout: Duration,
    next: Arc<dyn Provider>,
}

#[async_trait::async_trait]
impl Provider for TimeoutProvider {
    async fn do_request(
        &self,
        ctx: &RequestContext,
        prompt: &str,
        options: Option<&OptionMap>,
    ) -> Result<Completion, ClientError> {
        let attempt_ctx = ctx.with_timeout(self.timeout);
        self.next.do_request(&attempt_ctx, prompt, options).await
    }

    fn model(&self) -> String {
        self.next.model()
    }

    fn set_model(&self, model: &str) {
        self.next.set_model(model);
    }
}
