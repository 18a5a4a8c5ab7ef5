//! Auto-Mapper (spec.md §4.G).
//!
//! Grounded in `examples/original_source/backend/mapping_service.py`
//! (`_auto_mapping_spec`/`_choose_items_path`/`_normalize_target_path`/
//! `_normalize_source_path`): when no usable mapping spec exists yet, guess
//! one directly from the payload's schema fingerprint and the target
//! schema's canonical field list.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::config::FingerprintOptions;
use crate::fingerprint::fingerprint;
use crate::flatten::{canonical_item_paths, flatten_target_schema};

const DEFAULT_MAX_ITEMS_PER_ARRAY: usize = 10;

/// Choose the items path heuristically from the shape of `payload`
/// (spec.md §4.G step 1): a bare list payload uses `$[]`; an object payload
/// uses the first matching key among `items`/`data`/`records` whose value is
/// a list; otherwise falls back to `$.items[]`.
pub fn choose_items_path(payload: &Value) -> &'static str {
    match payload {
        Value::Array(_) => "$[]",
        Value::Object(map) => {
            for key in ["items", "data", "records"] {
                if matches!(map.get(key), Some(Value::Array(_))) {
                    return match key {
                        "items" => "$.items[]",
                        "data" => "$.data[]",
                        "records" => "$.records[]",
                        _ => unreachable!(),
                    };
                }
            }
            "$.items[]"
        }
        _ => "$.items[]",
    }
}

/// Build a best-effort normative mapping spec from `payload`'s schema and
/// `target_schema`'s canonical fields, with no LLM involved.
///
/// Sources are matched against the fingerprint, then re-expressed relative
/// to a single item (`$.<field>`, not `$.items[].<field>`) — the executor
/// evaluates a leaf's `source` against the already-extracted item, not the
/// whole payload, so only item-relative paths are usable here.
pub fn auto_mapping_spec(payload: &Value, target_schema: &Value) -> Value {
    let input_schema = fingerprint(
        payload,
        &FingerprintOptions {
            max_items_per_array: Some(DEFAULT_MAX_ITEMS_PER_ARRAY),
        },
    );
    let items_path = choose_items_path(payload);
    let items_prefix = normalize_target_path_like(items_path);

    let flattened = flatten_target_schema(target_schema);
    let item_targets = canonical_item_paths(&flattened);

    let normalized_sources: BTreeMap<String, String> = input_schema
        .keys()
        .filter_map(|path| item_relative_remainder(path, &items_prefix).map(|rest| (rest.clone(), rest)))
        .collect();

    let mut roaster_map = Map::new();
    for target in item_targets {
        let source = pick_source(&target, &normalized_sources);
        let mut leaf = Map::new();
        leaf.insert(
            "source".to_string(),
            source.map(|rest| Value::String(format!("$.{rest}"))).unwrap_or(Value::Null),
        );
        roaster_map.insert(target, Value::Object(leaf));
    }

    let mut items = Map::new();
    items.insert("path".to_string(), Value::String(items_path.to_string()));
    items.insert("map".to_string(), Value::Object(roaster_map));
    let mut mappings = Map::new();
    mappings.insert("items".to_string(), Value::Object(items));

    let mut spec = Map::new();
    spec.insert("version".to_string(), Value::String("1.0".to_string()));
    spec.insert("defaults".to_string(), Value::Object(Map::new()));
    spec.insert("broadcast".to_string(), Value::Object(Map::new()));
    spec.insert("mappings".to_string(), Value::Object(mappings));
    Value::Object(spec)
}

/// Strip `$`/`[]`/`[*]` markers the same way [`crate::flatten::normalize_target_path`]
/// does, for a bare items-path string (e.g. `"$.items[]"` -> `"items"`,
/// `"$[]"` -> `""`).
fn normalize_target_path_like(path: &str) -> String {
    crate::flatten::normalize_target_path(path)
}

/// Strip the items-array prefix from a normalized fingerprint path, keeping
/// only fields that actually live under the chosen items array. Returns
/// `None` for feed-level fields, which the Auto-Mapper never sources from.
fn item_relative_remainder(fingerprint_path: &str, items_prefix: &str) -> Option<String> {
    let normalized = normalize_target_path_like(fingerprint_path);
    if items_prefix.is_empty() {
        let rest = normalized.trim_start_matches('.');
        (!rest.is_empty()).then(|| rest.to_string())
    } else {
        normalized
            .strip_prefix(items_prefix)
            .and_then(|rest| rest.strip_prefix('.'))
            .filter(|rest| !rest.is_empty())
            .map(|rest| rest.to_string())
    }
}

fn pick_source(target_field: &str, normalized_sources: &BTreeMap<String, String>) -> Option<String> {
    if normalized_sources.contains_key(target_field) {
        return Some(target_field.to_string());
    }
    let target_tail = target_field.rsplit('.').next().unwrap_or(target_field);
    normalized_sources
        .keys()
        .find(|normalized| normalized.rsplit('.').next().unwrap_or(normalized.as_str()) == target_tail)
        .cloned()
}
