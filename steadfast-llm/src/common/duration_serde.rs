//! Serde helpers for human-readable `Duration` fields.
//!
//! Serializes as `"30s"`; accepts strings with `ms`/`s`/`m`/`h` suffixes
//! or a bare number of seconds, so config files stay readable.

use std::time::Duration;

use serde::{Deserializer, Serializer};

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let millis = duration.as_millis();
    if millis < 1000 || millis % 1000 != 0 {
        serializer.serialize_str(&format!("{millis}ms"))
    } else {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde::Deserialize;
    use serde_json::Value;

    match Value::deserialize(deserializer)? {
        Value::String(s) => parse_duration_string(&s).map_err(Error::custom),
        Value::Number(n) => {
            let secs = n
                .as_u64()
                .ok_or_else(|| Error::custom("duration seconds must be a non-negative integer"))?;
            Ok(Duration::from_secs(secs))
        }
        _ => Err(Error::custom("invalid duration format")),
    }
}

/// Split the trailing unit off a duration literal and scale the numeric
/// part into seconds. A missing unit means seconds.
fn parse_duration_string(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }

    let unit_len = input
        .chars()
        .rev()
        .take_while(char::is_ascii_alphabetic)
        .count();
    let (amount, unit) = input.split_at(input.len() - unit_len);

    let seconds_per_unit = match unit {
        "ms" => 0.001,
        "" | "s" => 1.0,
        "m" => 60.0,
        "h" => 3600.0,
        other => return Err(format!("unrecognized duration unit {other:?}")),
    };

    let amount: f64 = amount
        .parse()
        .map_err(|_| format!("malformed duration amount {amount:?}"))?;
    if !amount.is_finite() || amount < 0.0 {
        return Err(format!("duration amount {amount} is out of range"));
    }
    Ok(Duration::from_secs_f64(amount * seconds_per_unit))
}
