//! Lenient conversion of agent-supplied values.
//!
//! The agent sends most numbers as strings and occasionally sends garbage. A
//! field that cannot be converted is replaced with a zero-like value and the
//! batch carries on. This silently skews aggregates built on a bad field, so
//! every substitution is traced.

use serde_json::Value;
use thiserror::Error;
use tracing::trace;

/// Why a field fell back to its zero-like default.
#[derive(Error, Debug, PartialEq)]
pub enum MappingFallback {
    #[error("field is missing")]
    Missing,

    #[error("expected a number, got {found:?}")]
    NotNumeric { found: String },

    #[error("expected a string, got {found}")]
    NotString { found: &'static str },
}

/// Strictly converts a value to `f64`, accepting numbers and numeric strings.
pub fn parse_f64(value: Option<&Value>) -> Result<f64, MappingFallback> {
    match value {
        None | Some(Value::Null) => Err(MappingFallback::Missing),
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| MappingFallback::NotNumeric {
            found: n.to_string(),
        }),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| MappingFallback::NotNumeric { found: s.clone() }),
        Some(other) => Err(MappingFallback::NotNumeric {
            found: other.to_string(),
        }),
    }
}

/// Strictly converts a value to `i64`. Fractional input is truncated.
pub fn parse_i64(value: Option<&Value>) -> Result<i64, MappingFallback> {
    match value {
        None | Some(Value::Null) => Err(MappingFallback::Missing),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| MappingFallback::NotNumeric {
                found: n.to_string(),
            }),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .or_else(|_| s.parse::<f64>().map(|f| f as i64))
                .map_err(|_| MappingFallback::NotNumeric {
                    found: s.to_string(),
                })
        }
        Some(other) => Err(MappingFallback::NotNumeric {
            found: other.to_string(),
        }),
    }
}

/// Converts a scalar to its string form; arrays and objects are rejected.
pub fn parse_string(value: Option<&Value>) -> Result<String, MappingFallback> {
    match value {
        None | Some(Value::Null) => Err(MappingFallback::Missing),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Bool(b)) => Ok(b.to_string()),
        Some(Value::Array(_)) => Err(MappingFallback::NotString { found: "array" }),
        Some(Value::Object(_)) => Err(MappingFallback::NotString { found: "object" }),
    }
}

/// [`parse_f64`], falling back to `0.0`.
pub fn lenient_f64(value: Option<&Value>) -> f64 {
    parse_f64(value).unwrap_or_else(|e| {
        trace!(error = %e, "substituting 0.0");
        0.0
    })
}

/// [`parse_i64`], falling back to `0`.
pub fn lenient_i64(value: Option<&Value>) -> i64 {
    parse_i64(value).unwrap_or_else(|e| {
        trace!(error = %e, "substituting 0");
        0
    })
}

/// [`parse_string`], falling back to an empty string.
pub fn lenient_string(value: Option<&Value>) -> String {
    parse_string(value).unwrap_or_else(|e| {
        trace!(error = %e, "substituting empty string");
        String::new()
    })
}

/// Converts a percentage such as `"42%"` to a 0..1 fraction.
pub fn percent_fraction(value: Option<&Value>) -> f64 {
    let percent = match value {
        Some(Value::String(s)) => {
            let s = s.trim();
            let digits = s.strip_suffix('%').unwrap_or(s);
            lenient_f64(Some(&Value::from(digits)))
        }
        other => lenient_f64(other),
    };
    percent / 100.0
}

/// Converts epoch seconds (possibly fractional) to epoch milliseconds, truncating.
///
/// Negative, missing and unparseable inputs yield `None`.
pub fn epoch_millis(seconds: Option<&Value>) -> Option<u64> {
    let seconds = parse_f64(seconds).ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some((seconds * 1000.0) as u64)
}
