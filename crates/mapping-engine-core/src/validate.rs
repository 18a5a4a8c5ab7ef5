//! Mapping Spec Validator (spec.md §4.E).
//!
//! Grounded in
//! `examples/original_source/backend/build/backend/roaster_mapping_validator.py`
//! (`validate_mapping_spec`/`_validate_map_block`), carried over field-for-
//! field: this is the read-only counterpart to `repair` — it never mutates
//! its input, only reports every structural problem it finds.

use serde_json::Value;

use crate::spec::FEED_LEVEL_PREFIXES;

/// Validate a normative-dialect mapping spec, returning every error found
/// (empty means valid). Never panics on malformed input — absence of a
/// required shape is reported as an error string, not a `Result::Err`.
pub fn validate_mapping_spec(mapping_spec: &Value) -> Vec<String> {
    let mut errors = Vec::new();

    let Some(spec_obj) = mapping_spec.as_object() else {
        errors.push("mapping_spec must be a JSON object".to_string());
        return errors;
    };

    let Some(mappings) = spec_obj.get("mappings").and_then(Value::as_object) else {
        errors.push("mapping_spec.mappings must be an object".to_string());
        return errors;
    };

    let Some(items) = mappings.get("items").and_then(Value::as_object) else {
        errors.push("mapping_spec.mappings.items must be an object".to_string());
        return errors;
    };

    if !is_array_path(items.get("path")) {
        errors.push("mappings.items.path must be a JSONPath array (e.g., $.items[])".to_string());
    }

    let Some(items_map) = items.get("map").and_then(Value::as_object) else {
        errors.push("mappings.items.map must be an object".to_string());
        return errors;
    };

    errors.extend(validate_map_block(items_map, "mappings.items.map", true));

    for section in ["broadcast", "defaults"] {
        let Some(section_val) = spec_obj.get(section) else {
            continue;
        };
        let Some(section_obj) = section_val.as_object() else {
            errors.push(format!("mapping_spec.{section} must be an object"));
            continue;
        };
        for target_field in section_obj.keys() {
            if target_has_illegal_tokens(target_field) {
                errors.push(format!(
                    "{section} target '{target_field}' must not contain '$' or '[]'"
                ));
            }
        }
    }

    errors
}

fn validate_map_block(
    map_block: &serde_json::Map<String, Value>,
    context: &str,
    in_item_context: bool,
) -> Vec<String> {
    let mut errors = Vec::new();

    for (target_field, spec) in map_block {
        if target_has_illegal_tokens(target_field) {
            errors.push(format!(
                "{context} target '{target_field}' must not contain '$' or '[]'"
            ));
        }

        let Some(spec_obj) = spec.as_object() else {
            errors.push(format!("{context}.{target_field} must be an object"));
            continue;
        };

        if spec_obj.contains_key("path") && spec_obj.contains_key("map") {
            if !is_array_path(spec_obj.get("path")) {
                errors.push(format!("{context}.{target_field}.path must be a JSONPath array"));
            }
            match spec_obj.get("map").and_then(Value::as_object) {
                Some(nested_map) => {
                    let nested_context = format!("{context}.{target_field}.map");
                    errors.extend(validate_map_block(nested_map, &nested_context, true));
                }
                None => errors.push(format!("{context}.{target_field}.map must be an object")),
            }
            continue;
        }

        let Some(sources_val) = spec_obj.get("source") else {
            continue;
        };
        if sources_val.is_null() {
            continue;
        }

        let sources: Vec<Value> = match sources_val {
            Value::String(s) => vec![Value::String(s.clone())],
            Value::Array(items) => items.clone(),
            _ => {
                errors.push(format!("{context}.{target_field}.source must be a string or list"));
                continue;
            }
        };

        if in_item_context {
            for source in &sources {
                if let Value::String(text) = source {
                    if FEED_LEVEL_PREFIXES.iter().any(|prefix| text.starts_with(prefix)) {
                        errors.push(format!(
                            "{context}.{target_field}.source references feed metadata; use broadcast/defaults"
                        ));
                    }
                }
            }
        }
    }

    errors
}

fn is_array_path(path: Option<&Value>) -> bool {
    match path.and_then(Value::as_str) {
        Some(p) => p.ends_with("[]") || p.ends_with("[*]"),
        None => false,
    }
}

fn target_has_illegal_tokens(target_field: &str) -> bool {
    target_field.contains("[]") || target_field.contains('$')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn non_object_spec_is_invalid() {
        let errors = validate_mapping_spec(&json!("not an object"));
        assert_eq!(errors, vec!["mapping_spec must be a JSON object"]);
    }

    #[test]
    fn missing_mappings_is_invalid() {
        let errors = validate_mapping_spec(&json!({}));
        assert_eq!(errors, vec!["mapping_spec.mappings must be an object"]);
    }

    #[test]
    fn non_array_items_path_is_invalid() {
        let spec = json!({
            "mappings": {"items": {"path": "$.items", "map": {}}}
        });
        let errors = validate_mapping_spec(&spec);
        assert!(errors.iter().any(|e| e.contains("must be a JSONPath array")));
    }

    #[test]
    fn valid_spec_has_no_errors() {
        let spec = json!({
            "mappings": {"items": {"path": "$.items[]", "map": {
                "id": {"source": "$.id"}
            }}},
            "broadcast": {},
            "defaults": {}
        });
        assert!(validate_mapping_spec(&spec).is_empty());
    }

    #[test]
    fn illegal_target_tokens_are_flagged() {
        let spec = json!({
            "mappings": {"items": {"path": "$.items[]", "map": {
                "id[]": {"source": "$.id"}
            }}}
        });
        let errors = validate_mapping_spec(&spec);
        assert!(errors.iter().any(|e| e.contains("must not contain")));
    }

    #[test]
    fn feed_level_source_in_item_context_is_flagged() {
        let spec = json!({
            "mappings": {"items": {"path": "$.items[]", "map": {
                "country": {"source": "$.feed_metadata.country"}
            }}}
        });
        let errors = validate_mapping_spec(&spec);
        assert!(errors.iter().any(|e| e.contains("references feed metadata")));
    }

    #[test]
    fn feed_level_source_in_broadcast_is_not_item_context() {
        let spec = json!({
            "mappings": {"items": {"path": "$.items[]", "map": {}}},
            "broadcast": {"country": {"source": "$.feed_metadata.country"}}
        });
        assert!(validate_mapping_spec(&spec).is_empty());
    }

    #[test]
    fn nested_map_block_validated_recursively() {
        let spec = json!({
            "mappings": {"items": {"path": "$.items[]", "map": {
                "lines": {"path": "$.lines", "map": {
                    "sku": {"source": "$.feed_metadata.sku"}
                }}
            }}}
        });
        let errors = validate_mapping_spec(&spec);
        assert!(errors.iter().any(|e| e.contains("lines.path must be a JSONPath array")));
        assert!(errors.iter().any(|e| e.contains("references feed metadata")));
    }

    #[test]
    fn source_of_wrong_type_is_flagged() {
        let spec = json!({
            "mappings": {"items": {"path": "$.items[]", "map": {
                "id": {"source": 42}
            }}}
        });
        let errors = validate_mapping_spec(&spec);
        assert!(errors.iter().any(|e| e.contains("must be a string or list")));
    }
}
