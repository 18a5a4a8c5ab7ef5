//! Mapping Spec Repair (spec.md §4.D).
//!
//! Coerces a spec fragment — the normative dialect, the legacy flat dialect,
//! or raw (possibly prose-wrapped) LLM text — into the normative nested
//! dialect. Grounded in
//! `examples/original_source/backend/roaster_mapping_repair.py`
//! (`repair_mapping_spec`/`_repair_map_block`/`_repair_leaf_mapping`/
//! `extract_first_json_object`) for exact coercion and relocation rules.
//!
//! Per DESIGN NOTES (spec.md §9, "the source allows `mappings: [list]` at
//! the top level; implementers should convert via Repair rather than
//! executing directly"), this is also where the legacy flat dialect's
//! top-level `mappings` array is converted into the nested `items.map`
//! shape — in the source backend that conversion lived in the service layer
//! (`_build_roaster_mapping_from_list`); this redesign folds it into Repair
//! so every caller of `execute`/`validate` sees only the normative dialect.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::spec::{legacy_transform_name, LegacyMappingEntry, FEED_LEVEL_PREFIXES};

/// Repair `input` (a normative spec, legacy flat spec, or raw text) into the
/// normative dialect.
///
/// Returns `(None, repairs)` when the input cannot be recovered at all (not
/// an object and not text containing a balanced JSON object). Otherwise
/// returns `(Some(spec), repairs)` — `repairs` is a log of every change
/// made, empty when the input needed no repair.
///
/// When `allowed_targets` is given, it is enforced only at the top level of
/// `mappings.items.map` — nested `{path, map}` blocks are never filtered
/// (spec.md §4.D step 4) — and any target missing after the walk is
/// backfilled with `{source: null}` (step 5).
pub fn repair(input: &Value, allowed_targets: Option<&BTreeSet<String>>) -> (Option<Value>, Vec<String>) {
    let mut repairs = Vec::new();
    let Some(mut spec_obj) = coerce(input, &mut repairs) else {
        return (None, repairs);
    };

    if matches!(spec_obj.get("mappings"), Some(Value::Array(_))) {
        spec_obj = convert_legacy_list(&spec_obj, &mut repairs);
    }

    if !matches!(spec_obj.get("defaults"), Some(Value::Object(_))) {
        spec_obj.insert("defaults".to_string(), Value::Object(Map::new()));
        repairs.push("Initialized missing defaults to {}".to_string());
    }
    if !matches!(spec_obj.get("broadcast"), Some(Value::Object(_))) {
        spec_obj.insert("broadcast".to_string(), Value::Object(Map::new()));
        repairs.push("Initialized missing broadcast to {}".to_string());
    }

    let mut defaults = normalize_target_key_map(
        spec_obj.get("defaults").and_then(Value::as_object).unwrap(),
        &mut repairs,
    );
    let mut broadcast = normalize_target_key_map(
        spec_obj.get("broadcast").and_then(Value::as_object).unwrap(),
        &mut repairs,
    );

    let items_map = matches!(spec_obj.get("mappings"), Some(Value::Object(_)))
        .then(|| spec_obj["mappings"].as_object().unwrap())
        .and_then(|mappings| mappings.get("items"))
        .and_then(Value::as_object)
        .and_then(|items| items.get("map"))
        .and_then(Value::as_object)
        .cloned();

    let Some(items_map) = items_map else {
        spec_obj.insert("defaults".to_string(), Value::Object(defaults));
        spec_obj.insert("broadcast".to_string(), Value::Object(broadcast));
        return (Some(Value::Object(spec_obj)), repairs);
    };

    let mut repaired_map = repair_map_block(
        &items_map,
        &mut broadcast,
        &mut defaults,
        allowed_targets,
        true,
        &mut repairs,
    );

    if let Some(targets) = allowed_targets {
        let mut sorted: Vec<&String> = targets.iter().collect();
        sorted.sort();
        for target in sorted {
            if !repaired_map.contains_key(target) {
                let mut leaf = Map::new();
                leaf.insert("source".to_string(), Value::Null);
                repaired_map.insert(target.clone(), Value::Object(leaf));
                repairs.push(format!("Added missing target '{target}' with null source"));
            }
        }
    }

    let mut mappings = spec_obj["mappings"].as_object().unwrap().clone();
    let mut items = mappings["items"].as_object().unwrap().clone();
    items.insert("map".to_string(), Value::Object(repaired_map));
    mappings.insert("items".to_string(), Value::Object(items));
    spec_obj.insert("mappings".to_string(), Value::Object(mappings));
    spec_obj.insert("defaults".to_string(), Value::Object(defaults));
    spec_obj.insert("broadcast".to_string(), Value::Object(broadcast));

    (Some(Value::Object(spec_obj)), repairs)
}

// ---------------------------------------------------------------------------
// Coercion
// ---------------------------------------------------------------------------

fn coerce(input: &Value, repairs: &mut Vec<String>) -> Option<Map<String, Value>> {
    match input {
        Value::Object(map) => Some(map.clone()),
        Value::String(text) => match extract_first_json_object(text) {
            Some(obj) => {
                repairs.push("Extracted JSON object from mapping text wrapper".to_string());
                Some(obj)
            }
            None => {
                repairs.push("Failed to extract JSON object from mapping text".to_string());
                None
            }
        },
        _ => None,
    }
}

/// Scan `text` for the first balanced top-level JSON object, tolerating
/// surrounding prose/markdown. Tracks string escapes so braces inside string
/// literals don't perturb the depth count.
fn extract_first_json_object(text: &str) -> Option<Map<String, Value>> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
            return Some(map);
        }
    }

    let start = trimmed.find('{')?;
    let mut in_string = false;
    let mut escape = false;
    let mut depth: i32 = 0;

    for (i, ch) in trimmed.char_indices() {
        if i < start {
            continue;
        }
        if in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = i + ch.len_utf8();
                    let candidate = &trimmed[start..end];
                    return match serde_json::from_str::<Value>(candidate) {
                        Ok(Value::Object(map)) => Some(map),
                        _ => None,
                    };
                }
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Legacy flat dialect conversion
// ---------------------------------------------------------------------------

fn convert_legacy_list(spec_obj: &Map<String, Value>, repairs: &mut Vec<String>) -> Map<String, Value> {
    let mut out = spec_obj.clone();
    let entries = spec_obj
        .get("mappings")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut defaults = spec_obj
        .get("defaults")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let mut map_block = Map::new();
    for entry_val in entries {
        let Ok(entry) = serde_json::from_value::<LegacyMappingEntry>(entry_val) else {
            continue;
        };
        let mut leaf = Map::new();
        leaf.insert(
            "source".to_string(),
            normalize_legacy_source(entry.source.as_ref()),
        );
        if let Some(transform) = legacy_transform_name(entry.transform.as_deref()) {
            leaf.insert("transform".to_string(), Value::String(transform.to_string()));
        }
        if entry.required {
            leaf.insert("required".to_string(), Value::Bool(true));
        }
        if let Some(match_map) = entry.match_map {
            leaf.insert("match".to_string(), Value::Object(match_map));
        }
        if let Some(default) = entry.default {
            defaults.insert(entry.target.clone(), default);
        }
        map_block.insert(entry.target.clone(), Value::Object(leaf));
    }
    repairs.push("Converted legacy flat mapping list into nested dialect".to_string());

    let mut items = Map::new();
    // The legacy dialect carries no items-path information; `$.items[]` is
    // the conventional default (mirrors `_choose_items_path`'s final
    // fallback branch in the source backend, which Repair cannot otherwise
    // reach since it is never given the payload).
    items.insert("path".to_string(), Value::String("$.items[]".to_string()));
    items.insert("map".to_string(), Value::Object(map_block));
    let mut mappings = Map::new();
    mappings.insert("items".to_string(), Value::Object(items));

    out.insert("version".to_string(), Value::String("1.0".to_string()));
    out.insert("defaults".to_string(), Value::Object(defaults));
    out.entry("broadcast")
        .or_insert_with(|| Value::Object(Map::new()));
    out.insert("mappings".to_string(), Value::Object(mappings));
    out.remove("targetSchema");
    out
}

fn normalize_legacy_source(source: Option<&Value>) -> Value {
    match source {
        None | Some(Value::Null) => Value::Null,
        Some(Value::String(s)) => normalize_source_str(s).map(Value::String).unwrap_or(Value::Null),
        Some(Value::Array(items)) => {
            let normalized: Vec<Value> = items
                .iter()
                .filter_map(Value::as_str)
                .filter_map(normalize_source_str)
                .map(Value::String)
                .collect();
            match normalized.len() {
                0 => Value::Null,
                1 => normalized.into_iter().next().unwrap(),
                _ => Value::Array(normalized),
            }
        }
        Some(_) => Value::Null,
    }
}

fn normalize_source_str(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('$') {
        Some(trimmed.to_string())
    } else {
        Some(format!("$.{trimmed}"))
    }
}

// ---------------------------------------------------------------------------
// Target-key normalization
// ---------------------------------------------------------------------------

fn normalize_target_key(key: &str) -> String {
    key.replace("[]", "")
}

fn normalize_target_key_map(map: &Map<String, Value>, repairs: &mut Vec<String>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in map {
        let normalized = normalize_target_key(key);
        if normalized != *key {
            repairs.push(format!("Normalized target key '{key}' -> '{normalized}'"));
        }
        out.insert(normalized, value.clone());
    }
    out
}

// ---------------------------------------------------------------------------
// Map-block walk
// ---------------------------------------------------------------------------

fn repair_map_block(
    map_block: &Map<String, Value>,
    broadcast: &mut Map<String, Value>,
    defaults: &mut Map<String, Value>,
    allowed_targets: Option<&BTreeSet<String>>,
    in_item_context: bool,
    repairs: &mut Vec<String>,
) -> Map<String, Value> {
    let mut out = Map::new();

    for (target_field, spec_val) in map_block {
        let Some(spec_obj) = spec_val.as_object() else {
            continue;
        };

        let normalized_target = normalize_target_key(target_field);
        if normalized_target != *target_field {
            repairs.push(format!(
                "Normalized target key '{target_field}' -> '{normalized_target}'"
            ));
        }
        if normalized_target.contains('$') {
            repairs.push(format!("Dropped illegal target field '{target_field}'"));
            continue;
        }
        if let Some(targets) = allowed_targets {
            if !targets.contains(&normalized_target) {
                repairs.push(format!("Dropped unknown target field '{target_field}'"));
                continue;
            }
        }

        let is_nested = spec_obj.contains_key("path")
            && matches!(spec_obj.get("map"), Some(Value::Object(_)));
        if is_nested {
            let nested_map = spec_obj["map"].as_object().unwrap();
            let repaired_nested =
                repair_map_block(nested_map, broadcast, defaults, None, true, repairs);
            let mut new_spec = spec_obj.clone();
            new_spec.insert("map".to_string(), Value::Object(repaired_nested));
            out.insert(normalized_target, Value::Object(new_spec));
            continue;
        }

        if let Some(repaired_leaf) = repair_leaf_mapping(
            &normalized_target,
            spec_obj,
            broadcast,
            defaults,
            in_item_context,
            repairs,
        ) {
            out.insert(normalized_target, Value::Object(repaired_leaf));
        }
    }

    out
}

fn repair_leaf_mapping(
    target: &str,
    spec_obj: &Map<String, Value>,
    broadcast: &mut Map<String, Value>,
    defaults: &mut Map<String, Value>,
    in_item_context: bool,
    repairs: &mut Vec<String>,
) -> Option<Map<String, Value>> {
    let sources_val = spec_obj.get("source");
    if matches!(sources_val, None | Some(Value::Null)) {
        return Some(spec_obj.clone());
    }
    let sources_val = sources_val.unwrap();

    let mut source_list: Vec<Value> = match sources_val {
        Value::String(_) => vec![sources_val.clone()],
        Value::Array(items) => items.clone(),
        // Unknown type for `source` is left untouched per spec.md §4.D step 4.
        _ => return Some(spec_obj.clone()),
    };

    source_list.retain(|s| match s {
        Value::String(text) if looks_like_expression(text) => {
            repairs.push(format!("Removed expression source for '{target}' (set to null)"));
            false
        }
        _ => true,
    });

    if in_item_context {
        let mut feed_source: Option<String> = None;
        let mut non_feed = Vec::new();
        for s in source_list {
            if let Value::String(text) = &s {
                if FEED_LEVEL_PREFIXES.iter().any(|prefix| text.starts_with(prefix)) {
                    feed_source.get_or_insert_with(|| text.clone());
                    continue;
                }
            }
            non_feed.push(s);
        }
        if let Some(feed_source) = feed_source {
            if !broadcast.contains_key(target) {
                let mut leaf = Map::new();
                leaf.insert("source".to_string(), Value::String(feed_source));
                broadcast.insert(target.to_string(), Value::Object(leaf));
                repairs.push(format!("Moved feed-level source to broadcast for '{target}'"));
            }
        }
        source_list = non_feed;
    }

    if let Some(Value::String(first)) = source_list.first() {
        if !first.starts_with('$') {
            defaults.insert(target.to_string(), Value::String(first.clone()));
            repairs.push(format!("Moved constant source into defaults for '{target}'"));
            source_list.clear();
        }
    }

    let mut new_spec = spec_obj.clone();
    let new_source = match source_list.len() {
        0 => Value::Null,
        1 => source_list.into_iter().next().unwrap(),
        _ => Value::Array(source_list),
    };
    new_spec.insert("source".to_string(), new_source);
    Some(new_spec)
}

fn looks_like_expression(value: &str) -> bool {
    if !value.starts_with('$') {
        return false;
    }
    [" + ", " - ", " * ", " / ", "'", "\"", "(", ")"]
        .iter()
        .any(|token| value.contains(token))
}
