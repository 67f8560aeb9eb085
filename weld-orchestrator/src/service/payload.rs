//! Payload flattening
//!
//! Turns a structured trigger payload into string parameters. Object fields
//! and array items become dotted keys (`git.branch`, `tags.0`), keys are
//! lower-cased, scalars are stringified and nulls are dropped.

use serde_json::Value;
use std::collections::BTreeMap;

/// Flattens `payload` into lower-cased dotted keys
///
/// A scalar payload has no key to live under and flattens to nothing.
pub fn flatten(payload: &Value) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    match payload {
        Value::Object(_) | Value::Array(_) => walk(payload, String::new(), &mut out),
        _ => {}
    }
    out
}

fn walk(value: &Value, prefix: String, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Null => {}
        Value::Bool(b) => {
            out.insert(prefix, b.to_string());
        }
        Value::Number(n) => {
            out.insert(prefix, n.to_string());
        }
        Value::String(s) => {
            out.insert(prefix, s.clone());
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                walk(item, join(&prefix, &i.to_string()), out);
            }
        }
        Value::Object(fields) => {
            for (key, item) in fields {
                walk(item, join(&prefix, &key.to_lowercase()), out);
            }
        }
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}
