//! Lenient value coercion shared by ingest adapters and the fusion engine.
//!
//! Every cast here silently falls back to a default on failure rather than
//! propagating an error: a single malformed field must never abort
//! processing of the record it belongs to (spec: per-field recoverable
//! errors coerce to `0`/`0.0` and continue).

use serde_json::Value;

/// Normalises a port value: `null` -> 0, `0x..` hex -> base 16, otherwise
/// decimal. Anything unparseable becomes 0.
pub fn cast_port(value: Option<&Value>) -> u32 {
    let Some(value) = value else { return 0 };
    match value {
        Value::Null => 0,
        Value::Number(n) => n.as_u64().unwrap_or(0) as u32,
        Value::String(s) => parse_port_str(s),
        _ => 0,
    }
}

fn parse_port_str(s: &str) -> u32 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0;
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u32::from_str_radix(hex, 16).unwrap_or(0);
    }
    trimmed.parse::<u32>().unwrap_or(0)
}

/// Coerces a JSON value to `i64`, defaulting to 0 on any failure.
pub fn cast_i64(value: Option<&Value>) -> i64 {
    let Some(value) = value else { return 0 };
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse::<f64>().map(|f| f as i64).unwrap_or(0),
        _ => 0,
    }
}

/// Coerces a JSON value to `u64`, defaulting to 0 on any failure.
pub fn cast_u64(value: Option<&Value>) -> u64 {
    cast_i64(value).max(0) as u64
}

/// Coerces a JSON value to `u32`, defaulting to 0 on any failure.
pub fn cast_u32(value: Option<&Value>) -> u32 {
    cast_i64(value).clamp(0, u32::MAX as i64) as u32
}

/// Coerces a JSON value to `f64`, defaulting to 0.0 on any failure.
pub fn cast_f64(value: Option<&Value>) -> f64 {
    let Some(value) = value else { return 0.0 };
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Coerces a JSON value to a trimmed `String`, defaulting to `"-"`.
pub fn cast_str(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => {
            let t = s.trim();
            if t.is_empty() { "-".to_string() } else { t.to_string() }
        }
        Some(Value::Number(n)) => n.to_string(),
        _ => "-".to_string(),
    }
}

/// `to_float(ts)`: accepts numbers, decimal-string numbers, and ISO-8601-like
/// strings (falling back to a date parser). Returns `None` if nothing
/// parses, which is fatal to the record carrying the timestamp.
pub fn to_float_timestamp(value: Option<&Value>) -> Option<f64> {
    let value = value?;
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let t = s.trim();
            if let Ok(f) = t.parse::<f64>() {
                return Some(f);
            }
            chrono::DateTime::parse_from_rfc3339(t)
                .map(|dt| dt.timestamp() as f64 + dt.timestamp_subsec_nanos() as f64 / 1e9)
                .ok()
        }
        _ => None,
    }
}

/// Coerces a timestamp-bearing field to whole seconds, per spec.md §4.2 step 1.
/// Unlike the other casts here, `None` is not coerced to a default: an
/// unparseable timestamp is fatal to the record carrying it, not just the
/// field, so the caller must propagate the failure.
pub fn cast_epoch_seconds(value: Option<&Value>) -> Option<i64> {
    to_float_timestamp(value).map(|f| f as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn port_hex_and_decimal() {
        assert_eq!(cast_port(Some(&json!("0x50"))), 80);
        assert_eq!(cast_port(Some(&json!("443"))), 443);
        assert_eq!(cast_port(Some(&json!(8080))), 8080);
        assert_eq!(cast_port(Some(&Value::Null)), 0);
        assert_eq!(cast_port(None), 0);
        assert_eq!(cast_port(Some(&json!("garbage"))), 0);
    }

    #[test]
    fn numeric_casts_default_on_failure() {
        assert_eq!(cast_i64(Some(&json!("not a number"))), 0);
        assert_eq!(cast_f64(Some(&json!("not a number"))), 0.0);
        assert_eq!(cast_u64(Some(&json!(-5))), 0);
    }

    #[test]
    fn timestamp_accepts_number_string_and_iso() {
        assert_eq!(cast_epoch_seconds(Some(&json!(1000))), Some(1000));
        assert_eq!(cast_epoch_seconds(Some(&json!("1000.5"))), Some(1000));
        assert_eq!(
            cast_epoch_seconds(Some(&json!("1970-01-01T00:16:40Z"))),
            Some(1000)
        );
        assert_eq!(cast_epoch_seconds(Some(&json!("not a date"))), None);
        assert_eq!(cast_epoch_seconds(None), None);
    }
}
