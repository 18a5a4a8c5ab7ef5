//! Mapping Executor (spec.md §4.F, §4.F.1–§4.F.4).
//!
//! Grounded in
//! `examples/original_source/backend/build/backend/roaster_mapping_executor.py`
//! (`MappingExecutor`). Path evaluation delegates to [`crate::path::evaluate`]
//! rather than re-implementing the walk — the Python class inlines its own
//! copy of the same algorithm, but here `path` is already the single source
//! of truth the rest of the crate shares.

use serde_json::{Map, Value};

use crate::path::evaluate;
use crate::spec::Transform;

/// Executes a normative mapping spec against partner payloads.
pub struct MappingExecutor<'a> {
    mapping_spec: &'a Value,
    canonical_paths: Vec<String>,
}

impl<'a> MappingExecutor<'a> {
    /// `canonical_schema_paths` should already be normalized, item-relative
    /// dotted paths (see [`crate::flatten::canonical_item_paths`]).
    pub fn new(mapping_spec: &'a Value, canonical_schema_paths: &[String]) -> Self {
        let canonical_paths = canonical_schema_paths
            .iter()
            .filter(|p| !p.is_empty())
            .cloned()
            .collect();
        MappingExecutor {
            mapping_spec,
            canonical_paths,
        }
    }

    /// Execute the mapping spec, returning `{"items": [...]}` (plus
    /// `partner_id` when the spec carries one).
    pub fn execute(&self, payload: &Value) -> Result<Value, String> {
        let mappings = self
            .mapping_spec
            .get("mappings")
            .and_then(Value::as_object)
            .ok_or_else(|| "mapping_spec.mappings must be an object".to_string())?;

        let broadcast_values = self.compute_broadcast(payload);
        let defaults = self
            .mapping_spec
            .get("defaults")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let items_spec = mappings
            .get("items")
            .and_then(Value::as_object)
            .ok_or_else(|| "mapping_spec.mappings.items must be an object".to_string())?;

        let items_path = items_spec.get("path").and_then(Value::as_str).unwrap_or("");
        let root_items = evaluate(payload, items_path);

        let empty_map = Map::new();
        let map_block = items_spec.get("map").and_then(Value::as_object).unwrap_or(&empty_map);

        let mut mapped_items = Vec::with_capacity(root_items.len());
        for item in root_items {
            let mut mapped_item = Map::new();
            self.apply_broadcast(&mut mapped_item, &broadcast_values);
            self.apply_map_block(item, map_block, &mut mapped_item);
            self.apply_defaults(&mut mapped_item, &defaults);
            self.ensure_canonical_fields(&mut mapped_item);
            mapped_items.push(Value::Object(mapped_item));
        }

        let mut result = Map::new();
        result.insert("items".to_string(), Value::Array(mapped_items));
        if let Some(partner_id) = self.mapping_spec.get("partner_id") {
            if !partner_id.is_null() {
                result.insert("partner_id".to_string(), partner_id.clone());
            }
        }
        Ok(Value::Object(result))
    }

    fn compute_broadcast(&self, payload: &Value) -> Map<String, Value> {
        let mut results = Map::new();
        let Some(broadcast_spec) = self.mapping_spec.get("broadcast").and_then(Value::as_object) else {
            return results;
        };
        for (target_field, spec) in broadcast_spec {
            let Some(spec_obj) = spec.as_object() else {
                continue;
            };
            if let Some(value) = evaluate_field(payload, spec_obj) {
                assign_nested(&mut results, target_field, value);
            }
        }
        results
    }

    fn apply_broadcast(&self, target: &mut Map<String, Value>, broadcast_values: &Map<String, Value>) {
        for (key, value) in broadcast_values {
            assign_nested(target, key, value.clone());
        }
    }

    fn apply_defaults(&self, target: &mut Map<String, Value>, defaults: &Map<String, Value>) {
        for (key, value) in defaults {
            if get_nested(target, key).is_none() {
                assign_nested(target, key, value.clone());
            }
        }
    }

    fn apply_map_block(&self, source: &Value, map_block: &Map<String, Value>, target: &mut Map<String, Value>) {
        for (target_field, spec) in map_block {
            let Some(spec_obj) = spec.as_object() else {
                continue;
            };

            let nested_path = spec_obj.get("path").and_then(Value::as_str);
            let nested_map = spec_obj.get("map").and_then(Value::as_object);
            if let (Some(path), Some(nested_map)) = (nested_path, nested_map) {
                let elements = evaluate(source, path);
                let mut nested_results = Vec::with_capacity(elements.len());
                for element in elements {
                    let mut nested_item = Map::new();
                    self.apply_map_block(element, nested_map, &mut nested_item);
                    nested_results.push(Value::Object(nested_item));
                }
                assign_nested(target, target_field, Value::Array(nested_results));
                continue;
            }

            let value = evaluate_field(source, spec_obj);
            let required = spec_obj.get("required").and_then(Value::as_bool).unwrap_or(false);
            match value {
                None if !required => continue,
                None => assign_nested(target, target_field, Value::Null),
                Some(value) => assign_nested(target, target_field, value),
            }
        }
    }

    fn ensure_canonical_fields(&self, target: &mut Map<String, Value>) {
        for path in &self.canonical_paths {
            let parts: Vec<&str> = path.split('.').collect();
            if path_conflicts_with_list(target, &parts) {
                continue;
            }
            if get_nested(target, path).is_none() {
                assign_nested(target, path, Value::Null);
            }
        }
    }
}

fn evaluate_field(source: &Value, spec: &Map<String, Value>) -> Option<Value> {
    let sources_val = spec.get("source")?;
    if sources_val.is_null() {
        return None;
    }
    let sources: Vec<&str> = match sources_val {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => return None,
    };

    let mut value: Option<Value> = None;
    for path in sources {
        let values = evaluate(source, path);
        let non_null: Vec<Value> = values
            .into_iter()
            .filter(|v| !v.is_null())
            .cloned()
            .collect();
        if non_null.is_empty() {
            continue;
        }
        value = Some(if non_null.len() > 1 {
            Value::Array(non_null)
        } else {
            non_null.into_iter().next().unwrap()
        });
        break;
    }

    let mut value = value?;

    if let Some(transform_name) = spec.get("transform").and_then(Value::as_str) {
        if let Some(transform) = Transform::parse(transform_name) {
            value = apply_transform(value, transform);
        }
    }

    if let Some(match_map) = spec.get("match").and_then(Value::as_object) {
        value = apply_match(value, match_map);
    }

    Some(value)
}

fn apply_transform(value: Value, transform: Transform) -> Value {
    if transform == Transform::EnsureArray {
        return match value {
            Value::Array(_) => value,
            Value::Null => Value::Array(Vec::new()),
            other => Value::Array(vec![other]),
        };
    }

    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| convert_scalar(v, transform))
                .collect(),
        ),
        other => convert_scalar(other, transform),
    }
}

fn convert_scalar(value: Value, transform: Transform) -> Value {
    if value.is_null() {
        return Value::Null;
    }
    match transform {
        Transform::ToFloat => as_f64(&value)
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Transform::ToInt => as_i64(&value)
            .map(|i| Value::Number(serde_json::Number::from(i)))
            .unwrap_or(Value::Null),
        Transform::ToString => Value::String(scalar_to_string(&value)),
        Transform::ToBoolean => to_boolean(&value).map(Value::Bool).unwrap_or(Value::Null),
        Transform::EnsureArray => unreachable!("handled before convert_scalar"),
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// `to_int`'s numeric coercion. Python's `int(val)` truncates a float/number
/// toward zero but raises `ValueError` (recovered as `None`) for a string
/// that isn't a bare integer literal — `int("19.99")` and `int("5e3")` both
/// fail, unlike `float(val)`. Parse strings as `i64` directly rather than
/// routing through `as_f64`, so a decimal or exponent string yields `null`
/// instead of silently truncating.
fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(if *b { 1 } else { 0 }),
        _ => None,
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn to_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" => Some(true),
            "false" | "0" | "no" | "n" => Some(false),
            _ => None,
        },
        Value::Number(n) => Some(n.as_f64().map(|f| f != 0.0).unwrap_or(true)),
        Value::Array(items) => Some(!items.is_empty()),
        Value::Object(map) => Some(!map.is_empty()),
        Value::Null => Some(false),
    }
}

fn apply_match(value: Value, match_map: &Map<String, Value>) -> Value {
    let default = match_map.get("default").cloned().unwrap_or(Value::Null);
    let map_one = |v: Value| -> Value {
        if v.is_null() {
            return default.clone();
        }
        let key = scalar_to_string(&v);
        match_map.get(&key).cloned().unwrap_or_else(|| default.clone())
    };

    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(map_one).collect()),
        other => map_one(other),
    }
}

fn assign_nested(target: &mut Map<String, Value>, dotted_path: &str, value: Value) {
    let parts: Vec<&str> = dotted_path.split('.').collect();
    let mut cursor = target;
    for part in &parts[..parts.len() - 1] {
        let entry = cursor
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        cursor = entry.as_object_mut().unwrap();
    }
    cursor.insert(parts[parts.len() - 1].to_string(), value);
}

fn get_nested(data: &Map<String, Value>, dotted_path: &str) -> Option<Value> {
    let mut cursor: &Value = &Value::Object(data.clone());
    for part in dotted_path.split('.') {
        cursor = cursor.as_object()?.get(part)?;
    }
    Some(cursor.clone())
}

fn path_conflicts_with_list(target: &Map<String, Value>, parts: &[&str]) -> bool {
    let mut cursor: &Value = &Value::Object(target.clone());
    for part in parts {
        if cursor.is_array() {
            return true;
        }
        let Some(obj) = cursor.as_object() else {
            return false;
        };
        match obj.get(*part) {
            Some(next) => cursor = next,
            None => return false,
        }
    }
    cursor.is_array()
}

/// Convenience entry point: build an executor and run it in one call,
/// mapping internal errors into [`crate::error::MappingError`].
pub fn execute(
    mapping_spec: &Value,
    canonical_schema_paths: &[String],
    payload: &Value,
) -> Result<Value, crate::error::MappingError> {
    MappingExecutor::new(mapping_spec, canonical_schema_paths)
        .execute(payload)
        .map_err(|message| crate::error::MappingError::MalformedSpec {
            path: "mappings".to_string(),
            message,
        })
}
