//! End-to-end pipeline behavior over a scriptable in-memory provider.
//!
//! Each test wires a real client chain (via the provider factory) around
//! a mock vendor whose per-call outcomes are scripted, then asserts the
//! observable contract: invocation counts, error identity, latencies,
//! and emitted metrics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use steadfast_llm::{
    Client, ClientConfig, ClientError, CircuitBreakerConfig, Completion, ErrorKind,
    MetricsCollector, Middleware, OptionMap, Provider, ProviderError, ProviderFactory,
    ProviderSpec, Registry, RegistryConfig, RequestContext, RetryPolicy,
    register_provider_factory,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Clone, Copy)]
enum Step {
    Succeed(&'static str),
    FailRateLimit,
    FailAuth,
}

/// Scriptable vendor stand-in. Steps are consumed per call; an exhausted
/// script keeps succeeding.
struct MockState {
    calls: AtomicU32,
    script: Mutex<VecDeque<Step>>,
    delay: Option<Duration>,
}

impl MockState {
    fn new(steps: &[Step]) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            script: Mutex::new(steps.iter().copied().collect()),
            delay: None,
        })
    }

    fn with_delay(steps: &[Step], delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            script: Mutex::new(steps.iter().copied().collect()),
            delay: Some(delay),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

struct MockProvider {
    state: Arc<MockState>,
    model: Mutex<String>,
}

#[async_trait::async_trait]
impl Provider for MockProvider {
    async fn do_request(
        &self,
        ctx: &RequestContext,
        _prompt: &str,
        _options: Option<&OptionMap>,
    ) -> Result<Completion, ClientError> {
        if let Some(err) = ctx.done("mock") {
            return Err(err);
        }
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.state.delay {
            ctx.sleep("mock", delay).await?;
        }

        let step = self
            .state
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Succeed("pong"));
        match step {
            Step::Succeed(text) => Ok(Completion {
                text: text.to_string(),
                tokens_in: 3,
                tokens_out: 5,
            }),
            Step::FailRateLimit => {
                Err(ProviderError::from_status("mock", 429, "rate limit exceeded").into())
            }
            Step::FailAuth => {
                Err(ProviderError::from_status("mock", 401, "invalid api key").into())
            }
        }
    }

    fn model(&self) -> String {
        self.model.lock().unwrap().clone()
    }

    fn set_model(&self, model: &str) {
        *self.model.lock().unwrap() = model.to_string();
    }
}

/// Register a factory producing providers bound to `state` and build a
/// client with the given middleware chain.
fn mock_client(name: &str, state: Arc<MockState>, middleware: Vec<Middleware>) -> Client {
    init_tracing();
    let factory: ProviderFactory = Arc::new(move |config| {
        Ok(Arc::new(MockProvider {
            state: state.clone(),
            model: Mutex::new(config.model.clone()),
        }) as Arc<dyn Provider>)
    });
    register_provider_factory(name, factory);

    let config = ClientConfig::new("test-key", "gpt-4").with_middleware(middleware);
    Client::new(name, config).unwrap()
}

type Sample = (String, f64, Vec<(String, String)>);
type Count = (String, u64, Vec<(String, String)>);

#[derive(Default)]
struct RecordingCollector {
    histograms: Mutex<Vec<Sample>>,
    counters: Mutex<Vec<Count>>,
}

impl RecordingCollector {
    fn counters_named(&self, name: &str) -> Vec<Count> {
        self.counters
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _, _)| n == name)
            .cloned()
            .collect()
    }

    fn histogram_count(&self, name: &str) -> usize {
        self.histograms
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _, _)| n == name)
            .count()
    }
}

fn label<'a>(labels: &'a [(String, String)], key: &str) -> Option<&'a str> {
    labels
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

impl MetricsCollector for RecordingCollector {
    fn record_counter(&self, name: &str, value: u64, labels: &[(&str, &str)]) {
        self.counters.lock().unwrap().push((
            name.to_string(),
            value,
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ));
    }

    fn record_gauge(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}

    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        self.histograms.lock().unwrap().push((
            name.to_string(),
            value,
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ));
    }

    fn record_latency(&self, _operation: &str, _duration: Duration, _labels: &[(&str, &str)]) {}
}

// Scenario 1: success through metrics → timeout → provider.
#[tokio::test]
async fn success_emits_one_latency_sample_and_success_counter() {
    let state = MockState::new(&[Step::Succeed("hello")]);
    let collector = Arc::new(RecordingCollector::default());
    let client = mock_client(
        "mock-success-metrics",
        state.clone(),
        vec![
            Middleware::metrics(collector.clone()),
            Middleware::Timeout(Duration::from_millis(100)),
        ],
    );

    let text = client
        .complete(&RequestContext::new(), "hi", None)
        .await
        .unwrap();
    assert_eq!(text, "hello");
    assert_eq!(state.calls(), 1);

    assert_eq!(collector.histogram_count("llm_latency_seconds"), 1);
    let requests = collector.counters_named("llm_requests_total");
    assert_eq!(requests.len(), 1);
    let (_, value, labels) = &requests[0];
    assert_eq!(*value, 1);
    assert_eq!(label(labels, "provider"), Some("openai"));
    assert_eq!(label(labels, "model"), Some("gpt-4"));
    assert_eq!(label(labels, "status"), Some("success"));

    // Token counters split by token_type, success only.
    let tokens = collector.counters_named("llm_tokens_total");
    assert_eq!(tokens.len(), 2);
    let input = tokens
        .iter()
        .find(|(_, _, l)| label(l, "token_type") == Some("input"))
        .expect("input token counter");
    let output = tokens
        .iter()
        .find(|(_, _, l)| label(l, "token_type") == Some("output"))
        .expect("output token counter");
    assert_eq!(input.1, 3);
    assert_eq!(output.1, 5);
}

// Scenario 2: breaker opens after max_failures and fails fast.
#[tokio::test]
async fn breaker_opens_after_failures_and_short_circuits() {
    let state = MockState::new(&[Step::FailRateLimit, Step::FailRateLimit]);
    let client = mock_client(
        "mock-breaker-trip",
        state.clone(),
        vec![Middleware::circuit_breaker(CircuitBreakerConfig {
            max_failures: 2,
            cooldown: Duration::from_millis(50),
        })],
    );
    let ctx = RequestContext::new();

    for _ in 0..2 {
        let err = client.complete(&ctx, "hi", None).await.unwrap_err();
        match err {
            ClientError::Provider(p) => assert_eq!(p.kind, ErrorKind::RateLimit),
            other => panic!("expected provider error, got {other}"),
        }
    }

    let err = client.complete(&ctx, "hi", None).await.unwrap_err();
    assert!(matches!(err, ClientError::CircuitOpen));
    assert_eq!(state.calls(), 2);
}

// Scenario 3: after the cooldown one probe reaches the provider and a
// success closes the circuit.
#[tokio::test]
async fn breaker_recovers_after_cooldown() {
    let state = MockState::new(&[Step::FailRateLimit, Step::FailRateLimit]);
    let client = mock_client(
        "mock-breaker-recover",
        state.clone(),
        vec![Middleware::circuit_breaker(CircuitBreakerConfig {
            max_failures: 2,
            cooldown: Duration::from_millis(50),
        })],
    );
    let ctx = RequestContext::new();

    for _ in 0..2 {
        let _ = client.complete(&ctx, "hi", None).await;
    }
    assert!(matches!(
        client.complete(&ctx, "hi", None).await.unwrap_err(),
        ClientError::CircuitOpen
    ));

    tokio::time::sleep(Duration::from_millis(60)).await;

    let text = client.complete(&ctx, "hi", None).await.unwrap();
    assert_eq!(text, "pong");
    // Two failures plus exactly one probe.
    assert_eq!(state.calls(), 3);

    // The circuit is closed again: the next call goes straight through.
    client.complete(&ctx, "hi", None).await.unwrap();
    assert_eq!(state.calls(), 4);
}

// Scenario 4: retry waits through transient failures and then succeeds.
#[tokio::test]
async fn retry_recovers_from_transient_failures() {
    let state = MockState::new(&[Step::FailRateLimit, Step::FailRateLimit, Step::Succeed("ok")]);
    let client = mock_client(
        "mock-retry-success",
        state.clone(),
        vec![Middleware::Retry(RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            jitter_factor: 0.25,
        })],
    );

    let start = Instant::now();
    let text = client
        .complete(&RequestContext::new(), "hi", None)
        .await
        .unwrap();
    assert_eq!(text, "ok");
    assert_eq!(state.calls(), 3);
    // Two waits of at least base_delay each, minus scheduler slack.
    assert!(start.elapsed() >= Duration::from_millis(18));
}

#[tokio::test]
async fn retry_exhaustion_wraps_last_cause_and_attempt_count() {
    let state = MockState::new(&[
        Step::FailRateLimit,
        Step::FailRateLimit,
        Step::FailRateLimit,
    ]);
    let client = mock_client(
        "mock-retry-exhausted",
        state.clone(),
        vec![Middleware::Retry(RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
            jitter_factor: 0.0,
        })],
    );

    let err = client
        .complete(&RequestContext::new(), "hi", None)
        .await
        .unwrap_err();
    assert_eq!(state.calls(), 3);
    match err {
        ClientError::RetriesExhausted { attempts, source } => {
            assert_eq!(attempts, 3);
            match *source {
                ClientError::Provider(p) => assert_eq!(p.kind, ErrorKind::RateLimit),
                other => panic!("expected provider cause, got {other}"),
            }
        }
        other => panic!("expected exhaustion, got {other}"),
    }
}

#[tokio::test]
async fn non_retryable_error_is_attempted_once() {
    let state = MockState::new(&[Step::FailAuth]);
    let client = mock_client(
        "mock-retry-auth",
        state.clone(),
        vec![Middleware::Retry(RetryPolicy::default())],
    );

    let err = client
        .complete(&RequestContext::new(), "hi", None)
        .await
        .unwrap_err();
    assert_eq!(state.calls(), 1);
    match err {
        ClientError::Provider(p) => assert_eq!(p.kind, ErrorKind::Authentication),
        other => panic!("expected provider error, got {other}"),
    }
}

// With retry outside the breaker, a trip stops the loop immediately.
#[tokio::test]
async fn retry_stops_on_circuit_open() {
    let state = MockState::new(&[Step::FailRateLimit]);
    let client = mock_client(
        "mock-retry-breaker",
        state.clone(),
        vec![
            Middleware::Retry(RetryPolicy {
                max_retries: 5,
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(50),
                jitter_factor: 0.0,
            }),
            Middleware::circuit_breaker(CircuitBreakerConfig {
                max_failures: 1,
                cooldown: Duration::from_secs(60),
            }),
        ],
    );

    let err = client
        .complete(&RequestContext::new(), "hi", None)
        .await
        .unwrap_err();
    // First attempt fails and trips the breaker; the second attempt is
    // refused without reaching the provider and ends the retry loop.
    assert!(matches!(err, ClientError::CircuitOpen));
    assert_eq!(state.calls(), 1);
}

// Scenario 5: model validation at the registry, no cache pollution.
#[tokio::test]
async fn registry_rejects_unsupported_model_with_allowed_set() {
    std::env::set_var("PIPELINE_TEST_OPENAI_KEY", "k");
    let mut providers = std::collections::HashMap::new();
    providers.insert(
        "openai".to_string(),
        ProviderSpec::new("openai", "PIPELINE_TEST_OPENAI_KEY", "gpt-4")
            .with_supported_models(vec!["gpt-4".to_string(), "gpt-3.5-turbo".to_string()]),
    );
    let registry = Registry::new(RegistryConfig {
        providers,
        default_provider: "openai".to_string(),
        default_timeout: Duration::from_secs(5),
        default_middleware: Vec::new(),
    })
    .unwrap();

    let err = registry.get_client("openai/unknown").unwrap_err();
    let rendered = err.to_string();
    assert!(rendered.contains("unknown"));
    assert!(rendered.contains("gpt-4"));
    assert!(rendered.contains("gpt-3.5-turbo"));
    assert!(registry.registered_providers().is_empty());

    let a = registry.get_client("openai/gpt-4").unwrap();
    let b = registry.get_client("openai/gpt-4").unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

// Scenario 6: per-attempt timeout beats a slow provider; metrics label
// the outcome as timeout.
#[tokio::test]
async fn timeout_aborts_slow_provider_and_labels_metrics() {
    let state = MockState::with_delay(&[Step::Succeed("late")], Duration::from_millis(200));
    let collector = Arc::new(RecordingCollector::default());
    let client = mock_client(
        "mock-timeout",
        state.clone(),
        vec![
            Middleware::metrics(collector.clone()),
            Middleware::Timeout(Duration::from_millis(50)),
        ],
    );

    let start = Instant::now();
    let err = client
        .complete(&RequestContext::new(), "hi", None)
        .await
        .unwrap_err();
    let elapsed = start.elapsed();

    match &err {
        ClientError::Provider(p) => assert_eq!(p.kind, ErrorKind::Timeout),
        other => panic!("expected timeout, got {other}"),
    }
    assert!(elapsed >= Duration::from_millis(45));
    assert!(elapsed < Duration::from_millis(150));

    let requests = collector.counters_named("llm_requests_total");
    assert_eq!(requests.len(), 1);
    assert_eq!(label(&requests[0].2, "status"), Some("timeout"));
    // No token counters on failure.
    assert!(collector.counters_named("llm_tokens_total").is_empty());
}

// Canceled context: every layer returns promptly and no vendor call is
// issued after the cancellation.
#[tokio::test]
async fn cancellation_short_circuits_the_chain() {
    let state = MockState::new(&[]);
    let client = Arc::new(mock_client(
        "mock-cancel",
        state.clone(),
        vec![
            Middleware::Retry(RetryPolicy::default()),
            Middleware::Timeout(Duration::from_secs(30)),
        ],
    ));

    let ctx = RequestContext::new();
    ctx.cancel();

    let start = Instant::now();
    let err = client.complete(&ctx, "hi", None).await.unwrap_err();
    assert!(start.elapsed() < Duration::from_millis(50));
    match err {
        ClientError::Provider(p) => assert_eq!(p.kind, ErrorKind::Network),
        other => panic!("expected cancellation error, got {other}"),
    }
    assert_eq!(state.calls(), 0);
}

// A full recommended chain end to end.
#[tokio::test]
async fn full_chain_completes_and_reports_usage() {
    let state = MockState::new(&[Step::FailRateLimit, Step::Succeed("all good")]);
    let collector = Arc::new(RecordingCollector::default());
    let client = mock_client(
        "mock-full-chain",
        state.clone(),
        vec![
            Middleware::tracing("pipeline-test"),
            Middleware::metrics(collector.clone()),
            Middleware::RateLimit(steadfast_llm::RateLimitConfig {
                rate: 100.0,
                burst: 10,
            }),
            Middleware::circuit_breaker(CircuitBreakerConfig::default()),
            Middleware::Retry(RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(50),
                jitter_factor: 0.25,
            }),
            Middleware::Timeout(Duration::from_secs(1)),
        ],
    );

    let completion = client
        .complete_with_usage(&RequestContext::new(), "hi", None)
        .await
        .unwrap();
    assert_eq!(completion.text, "all good");
    assert_eq!(completion.tokens_in, 3);
    assert_eq!(completion.tokens_out, 5);
    assert_eq!(state.calls(), 2);

    // Metrics sit outside retry: one request observed, and it succeeded.
    let requests = collector.counters_named("llm_requests_total");
    assert_eq!(requests.len(), 1);
    assert_eq!(label(&requests[0].2, "status"), Some("success"));
}
