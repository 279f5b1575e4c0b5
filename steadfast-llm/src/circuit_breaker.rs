//! Circuit breaker protecting a single provider chain.
//!
//! Three states: `Closed` (normal operation, failures counted), `Open`
//! (every request fails fast with [`ClientError::CircuitOpen`] until the
//! cooldown elapses), and `HalfOpen` (one probe request decides between
//! recovery and re-opening).
//!
//! The whole sequence — state inspection, downstream call, state update —
//! runs under one async mutex, which serializes requests through the
//! breaker and yields a total order on its state transitions. The rate
//! limiter upstream bounds throughput before contention matters.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::ClientError;

/// Circuit breaker operational states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests pass through; failures are counted
    Closed,
    /// Requests fail fast until the cooldown elapses
    Open,
    /// A single probe request is in flight
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in `Closed` before the circuit opens.
    /// Zero opens on the first failure.
    pub max_failures: u32,
    /// Minimum time spent `Open` before a probe is allowed.
    /// Zero makes the next request the probe.
    #[serde(with = "crate::common::duration_serde")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Observer for breaker activity. All methods default to no-ops; hooks are
/// invoked after the state update they describe.
pub trait CircuitBreakerHook: Send + Sync {
    fn record_state(&self, _state: CircuitState) {}
    fn record_trip(&self) {}
    fn record_success(&self) {}
    fn record_failure(&self) {}
}

/// Point-in-time view of a breaker, for observability.
#[derive(Debug, Clone, Copy)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_at: Option<Instant>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    hook: Option<Arc<dyn CircuitBreakerHook>>,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            hook: None,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
            }),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn CircuitBreakerHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Execute `op` under breaker protection.
    ///
    /// In `Open` before the cooldown elapses, returns
    /// [`ClientError::CircuitOpen`] without polling `op`.
    pub async fn call<T>(
        &self,
        op: impl std::future::Future<Output = Result<T, ClientError>>,
    ) -> Result<T, ClientError> {
        let mut state = self.state.lock().await;

        if state.state == CircuitState::Open {
            let cooled_down = state
                .last_failure_at
                .map(|at| at.elapsed() >= self.config.cooldown)
                .unwrap_or(true);
            if !cooled_down {
                tracing::warn!(breaker = %self.name, "circuit open, failing fast");
                return Err(ClientError::CircuitOpen);
            }
            state.state = CircuitState::HalfOpen;
            tracing::info!(breaker = %self.name, "circuit half-open, probing");
            self.emit_state(CircuitState::HalfOpen);
        }

        let result = op.await;
        match &result {
            Ok(_) => self.on_success(&mut state),
            Err(_) => self.on_failure(&mut state),
        }
        result
    }

    /// Current state, for observability. Taking the lock means a snapshot
    /// is never read mid-transition.
    pub async fn snapshot(&self) -> CircuitSnapshot {
        let state = self.state.lock().await;
        CircuitSnapshot {
            state: state.state,
            failure_count: state.failure_count,
            last_failure_at: state.last_failure_at,
        }
    }

    fn on_success(&self, state: &mut BreakerState) {
        let was = state.state;
        state.failure_count = 0;
        if was == CircuitState::HalfOpen {
            state.state = CircuitState::Closed;
            tracing::info!(breaker = %self.name, "circuit closed after successful probe");
            self.emit_state(CircuitState::Closed);
        }
        if let Some(hook) = &self.hook {
            hook.record_success();
        }
    }

    fn on_failure(&self, state: &mut BreakerState) {
        state.failure_count += 1;
        state.last_failure_at = Some(Instant::now());

        let tripped = match state.state {
            CircuitState::Closed => state.failure_count >= self.config.max_failures,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if tripped {
            state.state = CircuitState::Open;
            tracing::warn!(
                breaker = %self.name,
                failures = state.failure_count,
                "circuit opened"
            );
            if let Some(hook) = &self.hook {
                hook.record_trip();
            }
            self.emit_state(CircuitState::Open);
        }
        if let Some(hook) = &self.hook {
            hook.record_failure();
        }
    }

    fn emit_state(&self, state: CircuitState) {
        if let Some(hook) = &self.hook {
            hook.record_state(state);
        }
    }
}
