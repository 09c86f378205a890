//! Lenient accessors over the persisted JSON document.
//!
//! The site document is read as loosely-typed JSON. Unknown fields are
//! ignored outright; known fields carrying the wrong type are skipped with a
//! log line and the default applies. Nothing in here is fatal.

pub mod defaults;

use serde_json::{Map, Value};

/// String option, or `None` when absent or mistyped.
pub fn opt_str(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            tracing::info!("ignored non-string field {}={}", key, other);
            None
        }
    }
}

pub fn opt_str_or(map: &Map<String, Value>, key: &str, default: &str) -> String {
    opt_str(map, key).unwrap_or_else(|| default.to_string())
}

/// Unsigned integer option. Negative and fractional values are mistyped.
pub fn opt_u64(map: &Map<String, Value>, key: &str) -> Option<u64> {
    match map.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => match n.as_u64() {
            Some(v) => Some(v),
            None => {
                tracing::info!("ignored out-of-range field {}={}", key, n);
                None
            }
        },
        Some(other) => {
            tracing::info!("ignored non-integer field {}={}", key, other);
            None
        }
    }
}

pub fn opt_i64(map: &Map<String, Value>, key: &str) -> Option<i64> {
    match map.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => n.as_i64(),
        Some(other) => {
            tracing::info!("ignored non-integer field {}={}", key, other);
            None
        }
    }
}

pub fn opt_bool(map: &Map<String, Value>, key: &str) -> Option<bool> {
    match map.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::Bool(b)) => Some(*b),
        Some(other) => {
            tracing::info!("ignored non-boolean field {}={}", key, other);
            None
        }
    }
}

/// List of strings; non-string entries are dropped individually.
pub fn opt_str_list(map: &Map<String, Value>, key: &str) -> Option<Vec<String>> {
    match map.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
        Some(other) => {
            tracing::info!("ignored non-list field {}={}", key, other);
            None
        }
    }
}

pub fn opt_dict<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    match map.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::Object(m)) => Some(m),
        Some(other) => {
            tracing::info!("ignored non-object field {}={}", key, other);
            None
        }
    }
}
