//! Request and response data shapes.
//!
//! Callers pass options as an untyped string-to-JSON map. The map is
//! parsed exactly once, here, into a typed [`RequestOptions`]; providers
//! translate that into their own wire shapes. Out-of-range numbers clamp
//! into the supported range and wrong-typed values fall back to the
//! provider default — option parsing never rejects a request.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Untyped option map accepted by the public API.
pub type OptionMap = HashMap<String, Value>;

/// Result of a single completion round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    /// Completion text; non-empty on success
    pub text: String,
    /// Prompt-side token count (vendor-reported or estimated)
    pub tokens_in: u32,
    /// Completion-side token count (vendor-reported or estimated)
    pub tokens_out: u32,
}

/// Typed options parsed from an [`OptionMap`].
///
/// Keys the pipeline understands are lifted into fields; everything else
/// is preserved in `extras` for provider-specific passthrough (`top_k`,
/// `frequency_penalty`, ...).
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub system: Option<String>,
    pub extras: HashMap<String, Value>,
}

impl RequestOptions {
    /// Parse and normalize an option map. `None` yields defaults.
    pub fn from_map(options: Option<&OptionMap>) -> Self {
        let mut parsed = Self::default();
        let Some(map) = options else {
            return parsed;
        };

        for (key, value) in map {
            match key.as_str() {
                "model" => parsed.model = value.as_str().map(str::to_owned),
                "max_tokens" => {
                    parsed.max_tokens = value
                        .as_u64()
                        .filter(|&n| n > 0)
                        .map(|n| n.min(u32::MAX as u64) as u32);
                }
                "temperature" => {
                    parsed.temperature = value.as_f64().map(|t| clamp_f32(t, 0.0, 2.0));
                }
                "top_p" => {
                    parsed.top_p = value.as_f64().map(|p| clamp_f32(p, 0.0, 1.0));
                }
                "system" => parsed.system = value.as_str().map(str::to_owned),
                _ => {
                    parsed.extras.insert(key.clone(), value.clone());
                }
            }
        }

        parsed
    }

    /// A numeric extra clamped into `[lo, hi]`, or `None` when absent or
    /// malformed.
    pub fn extra_f64(&self, key: &str, lo: f64, hi: f64) -> Option<f64> {
        self.extras
            .get(key)
            .and_then(Value::as_f64)
            .map(|v| v.clamp(lo, hi))
    }

    /// An integer extra clamped into `[lo, hi]`.
    pub fn extra_i64(&self, key: &str, lo: i64, hi: i64) -> Option<i64> {
        self.extras
            .get(key)
            .and_then(Value::as_i64)
            .map(|v| v.clamp(lo, hi))
    }
}

fn clamp_f32(value: f64, lo: f64, hi: f64) -> f32 {
    value.clamp(lo, hi) as f32
}
