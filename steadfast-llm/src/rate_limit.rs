//! Token-bucket rate limiting.
//!
//! A bucket holds up to `burst` tokens and refills continuously at `rate`
//! tokens per second. Every request consumes one token; [`RateLimiter::wait`]
//! suspends until a token is available or the request context finishes.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::error::{ClientError, ErrorKind, ProviderError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained rate in tokens (requests) per second
    pub rate: f64,
    /// Maximum tokens accumulated while idle
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate: 5.0,
            burst: 10,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Shared token bucket guarding one provider chain.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    bucket: Mutex<Bucket>,
}

enum Acquire {
    Granted,
    /// Token available after this long
    After(Duration),
    /// The bucket can never produce another token
    Never,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let bucket = Bucket {
            tokens: config.burst as f64,
            last_refill: Instant::now(),
        };
        Self {
            config,
            bucket: Mutex::new(bucket),
        }
    }

    /// Block until a token is granted or the context finishes.
    ///
    /// A bucket with zero burst can never grant a token and refuses
    /// immediately; likewise a drained bucket with a zero rate.
    pub async fn wait(&self, ctx: &RequestContext, provider: &str) -> Result<(), ClientError> {
        loop {
            match self.acquire() {
                Acquire::Granted => return Ok(()),
                Acquire::Never => {
                    tracing::warn!(provider, "rate limiter refusing request");
                    return Err(ProviderError::new(
                        provider,
                        ErrorKind::RateLimit,
                        "rate limiter cannot grant a token",
                    )
                    .into());
                }
                Acquire::After(delay) => ctx.sleep(provider, delay).await?,
            }
        }
    }

    fn acquire(&self) -> Acquire {
        let mut bucket = self.bucket.lock().expect("rate limiter poisoned");

        // Refill for the time elapsed since the last acquisition attempt,
        // capped at the burst capacity.
        let now = Instant::now();
        if self.config.rate > 0.0 {
            let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
            bucket.tokens =
                (bucket.tokens + elapsed * self.config.rate).min(self.config.burst as f64);
        }
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Acquire::Granted;
        }

        if self.config.burst == 0 || self.config.rate <= 0.0 {
            return Acquire::Never;
        }

        let deficit = 1.0 - bucket.tokens;
        Acquire::After(Duration::from_secs_f64(deficit / self.config.rate))
    }
}
