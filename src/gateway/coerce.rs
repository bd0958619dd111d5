//! Defensive reads over loosely shaped backend rows.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    static ref DIGIT_RUN: Regex = Regex::new(r"-?\d+(?:\.\d+)?").unwrap();
}

/// Finite number, fully numeric string, or the first digit run embedded in a string.
pub fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            if let Ok(f) = trimmed.parse::<f64>() {
                if f.is_finite() {
                    return Some(f);
                }
            }
            DIGIT_RUN
                .find(trimmed)
                .and_then(|m| m.as_str().parse::<f64>().ok())
                .filter(|f| f.is_finite())
        }
        _ => None,
    }
}

/// Strictly numeric: a finite number or a string that parses in full.
pub fn parse_full_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

pub fn pick_number(row: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|k| row.get(*k))
        .find_map(coerce_number)
}

/// First candidate key holding a positive integer.
pub fn pick_id(row: &Value, keys: &[&str]) -> Option<u32> {
    pick_number(row, keys)
        .filter(|f| *f >= 1.0 && f.fract() == 0.0 && *f <= u32::MAX as f64)
        .map(|f| f as u32)
}

/// First candidate key holding a non-empty string (numbers are rendered).
pub fn pick_str(row: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().filter_map(|k| row.get(*k)).find_map(|v| match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Text form used for equality filters and display.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}
