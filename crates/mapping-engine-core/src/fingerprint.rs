//! Schema fingerprinting — deterministic structural summary of JSON (spec.md §4.B).

use std::collections::BTreeMap;

use serde_json::Value;

use crate::config::FingerprintOptions;

/// A schema fingerprint: structural path → type tag, always iterated in
/// sorted-path order (a `BTreeMap` gives us this for free).
pub type Fingerprint = BTreeMap<String, String>;

/// Produce the schema fingerprint of `payload` under the given options.
pub fn fingerprint(payload: &Value, options: &FingerprintOptions) -> Fingerprint {
    let mut out = Fingerprint::new();
    walk(payload, "$", options.max_items_per_array, &mut out);
    out
}

fn walk(value: &Value, prefix: &str, max_items: Option<usize>, out: &mut Fingerprint) {
    match value {
        Value::Object(map) => {
            if map.is_empty() {
                out.insert(prefix.to_string(), "object (empty)".to_string());
                return;
            }
            for (key, child) in map {
                let child_prefix = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                walk(child, &child_prefix, max_items, out);
            }
        }
        Value::Array(items) => walk_array(items, prefix, max_items, out),
        other => {
            out.insert(prefix.to_string(), describe_primitive(other).to_string());
        }
    }
}

fn walk_array(items: &[Value], prefix: &str, max_items: Option<usize>, out: &mut Fingerprint) {
    let array_prefix = format!("{prefix}[]");
    if items.is_empty() {
        out.insert(array_prefix, "array (empty)".to_string());
        return;
    }

    let sample: &[Value] = match max_items {
        Some(n) => &items[..items.len().min(n)],
        None => items,
    };

    let mut non_null_seen = false;
    let mut primitive_type: Option<&'static str> = None;
    let mut container_type: Option<&'static str> = None;

    for value in sample {
        if value.is_null() {
            continue;
        }
        non_null_seen = true;
        match value {
            Value::Object(_) => {
                container_type.get_or_insert("object");
                walk(value, &array_prefix, max_items, out);
            }
            Value::Array(_) => {
                container_type.get_or_insert("array");
                walk(value, &array_prefix, max_items, out);
            }
            other => {
                let ty = primitive_type.get_or_insert(describe_primitive(other));
                out.insert(array_prefix.clone(), format!("array<{ty}>"));
            }
        }
    }

    if !non_null_seen {
        out.insert(array_prefix, "array<null>".to_string());
    } else if primitive_type.is_none() {
        let inferred = container_type.unwrap_or("unknown");
        out.insert(array_prefix, format!("array<{inferred}>"));
    }
}

fn describe_primitive(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        // Objects/arrays never reach here — `walk` intercepts them first.
        Value::Object(_) | Value::Array(_) => "unknown",
    }
}
