//! Retry policy and backoff arithmetic.
//!
//! The retry middleware re-invokes the downstream chain up to
//! `max_retries` additional times, sleeping between attempts with bounded
//! exponential backoff and jitter. Which failures are worth retrying is
//! decided by [`ClientError::is_retryable`](crate::error::ClientError);
//! the delay math lives here so it can be tested in isolation.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exponent cap preventing `2^attempt` overflow on long retry loops.
const MAX_BACKOFF_EXPONENT: u32 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first; total calls = `max_retries + 1`
    pub max_retries: u32,
    /// Delay before the first retry; also the floor for every delay
    #[serde(with = "crate::common::duration_serde")]
    pub base_delay: Duration,
    /// Cap on the exponential growth
    #[serde(with = "crate::common::duration_serde")]
    pub max_delay: Duration,
    /// Random perturbation as a fraction of the computed delay (0.25 = ±25%)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following failed attempt number `attempt`
    /// (zero-based): `min(max_delay, base_delay * 2^attempt)` perturbed by
    /// ±`jitter_factor`, never below `base_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(MAX_BACKOFF_EXPONENT);
        let exponential = self.base_delay.as_secs_f64() * 2f64.powi(exponent as i32);
        let capped = exponential.min(self.max_delay.as_secs_f64());

        let jitter = self.jitter_factor.clamp(0.0, 1.0);
        let multiplier = if jitter > 0.0 {
            1.0 + rand::thread_rng().gen_range(-jitter..=jitter)
        } else {
            1.0
        };

        let perturbed = capped * multiplier;
        Duration::from_secs_f64(perturbed.max(self.base_delay.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: f64) -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter_factor: jitter,
        }
    }

    #[test]
    fn test_exponential_growth_without_jitter() {
        let p = policy(0.0);
        assert_eq!(p.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(p.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_caps_at_max() {
        let p = policy(0.0);
        assert_eq!(p.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let p = policy(0.0);
        assert_eq!(p.delay_for_attempt(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_bounded_and_floored() {
        let p = policy(0.25);
        for attempt in 0..6 {
            let delay = p.delay_for_attempt(attempt);
            assert!(delay >= p.base_delay, "delay below base at attempt {attempt}");
            assert!(
                delay <= Duration::from_secs_f64(p.max_delay.as_secs_f64() * 1.25),
                "delay above jittered cap at attempt {attempt}"
            );
        }
    }
}
