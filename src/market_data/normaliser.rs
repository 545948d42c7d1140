// Lenient conversions from wire values into the numbers a NormalizedEvent needs.
// Venues send numbers as strings, as JSON numbers, or leave them out entirely;
// everything that does not parse to a finite value becomes 0.0 so the event
// constructor rejects it.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// Parse a decimal string, mapping junk and non-finite values to 0.0.
pub fn num(s: &str) -> f64 {
    s.trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .unwrap_or(0.0)
}

/// Same as [`num`] for an arbitrary JSON value.
pub fn num_value(v: &Value) -> f64 {
    match v {
        Value::Number(n) => n.as_f64().filter(|n| n.is_finite()).unwrap_or(0.0),
        Value::String(s) => num(s),
        _ => 0.0,
    }
}

/// serde helper: string-or-number field, absent/null/junk as `None`.
pub fn de_opt_num<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Null => None,
        other => {
            let n = num_value(&other);
            if n == 0.0 && !is_literal_zero(&other) {
                None
            } else {
                Some(n)
            }
        }
    }))
}

/// serde helper: string-or-number epoch millis.
pub fn de_opt_ms<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }))
}

fn is_literal_zero(v: &Value) -> bool {
    match v {
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.trim().parse::<f64>().ok() == Some(0.0),
        _ => false,
    }
}

/// Strip the first matching quote-asset suffix (case-insensitive), e.g. BTCUSDT -> BTC.
pub fn strip_quote<'a>(symbol: &'a str, suffixes: &[&str]) -> &'a str {
    let upper = symbol.to_ascii_uppercase();
    for suffix in suffixes {
        if upper.len() > suffix.len() && upper.ends_with(suffix) {
            return &symbol[..symbol.len() - suffix.len()];
        }
    }
    symbol
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
