//! Target-schema flattening and canonical-path normalization (spec.md §4.C).

use std::collections::BTreeMap;

use serde_json::Value;

/// Flatten an example-shaped target schema value into a path-keyed map of
/// type-name values.
///
/// If `schema` already looks path-keyed (any top-level key starts with
/// `$`), it is used as-is (cloned). Otherwise: objects recurse per key,
/// arrays recurse on their first element (an empty array yields
/// `{prefix[]: "array"}`), and any other value is a leaf `{prefix: value}`.
pub fn flatten_target_schema(schema: &Value) -> BTreeMap<String, Value> {
    if let Value::Object(map) = schema {
        if map.keys().any(|k| k.starts_with('$')) {
            return map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        }
    }
    let mut out = BTreeMap::new();
    flatten_into(schema, "$", &mut out);
    out
}

fn flatten_into(value: &Value, prefix: &str, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            if map.is_empty() {
                out.insert(prefix.to_string(), Value::String("object".to_string()));
                return;
            }
            for (key, child) in map {
                let child_prefix = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(child, &child_prefix, out);
            }
        }
        Value::Array(items) => {
            let array_prefix = format!("{prefix}[]");
            if items.is_empty() {
                out.insert(array_prefix, Value::String("array".to_string()));
                return;
            }
            flatten_into(&items[0], &array_prefix, out);
        }
        other => {
            out.insert(prefix.to_string(), other.clone());
        }
    }
}

/// Strip a leading `$.`/`$` root marker and all `[]`/`[*]` segment markers
/// from a path, producing a canonical target dotted-path.
pub fn normalize_target_path(path: &str) -> String {
    let stripped = path.strip_prefix("$.").or_else(|| path.strip_prefix('$'));
    let stripped = stripped.unwrap_or(path);
    stripped.replace("[*]", "").replace("[]", "")
}

/// Canonical target paths: normalized paths from a flattened target schema
/// that contain the item-sequence anchor `.items[]`, relative to the item
/// root (the `items[].`/`items.` prefix is stripped — spec.md §9 Open
/// Question, resolved in favor of stripping it once here).
pub fn canonical_item_paths(flattened: &BTreeMap<String, Value>) -> Vec<String> {
    let mut out: Vec<String> = flattened
        .keys()
        .filter(|path| path.contains(".items[]") || path.contains("items[]."))
        .map(|path| strip_items_prefix(&normalize_target_path(path)))
        .filter(|path| !path.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

fn strip_items_prefix(normalized: &str) -> String {
    if let Some(rest) = normalized.strip_prefix("items[].") {
        rest.to_string()
    } else if let Some(rest) = normalized.strip_prefix("items.") {
        rest.to_string()
    } else {
        normalized.to_string()
    }
}
