//! Refinement Loop (spec.md §4.H, §4.H.1).
//!
//! Grounded in
//! `examples/original_source/backend/build/backend/mapping_service.py`
//! (`_generate_mapping_with_agent`/`_summarize_mapping_issues`/
//! `_has_mapping_issues`/`_collect_leaf_sources`). The source backend calls
//! Bedrock directly; here the oracle is injected (see
//! [`crate::oracle::Oracle`]), and progress is logged with `tracing`
//! instead of the stdlib `logging` module the source uses.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::automap::{auto_mapping_spec, choose_items_path};
use crate::config::{FingerprintOptions, RefinementOptions};
use crate::executor::execute;
use crate::fingerprint::fingerprint;
use crate::oracle::Oracle;
use crate::repair::repair;
use crate::validate::validate_mapping_spec;

const MISSING_FIELD_CAP: usize = 40;
const SPARSITY_THRESHOLD: f64 = 0.5;

/// A field whose output is populated for fewer than
/// [`SPARSITY_THRESHOLD`] of items.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SparseField {
    pub field: String,
    #[serde(rename = "nonNull")]
    pub non_null: usize,
    pub total: usize,
}

/// The issue summary produced after one candidate spec is repaired and
/// executed (spec.md §4.H.1).
#[derive(Debug, Clone, Default, Serialize)]
pub struct IssueSummary {
    #[serde(rename = "validationErrors")]
    pub validation_errors: Vec<String>,
    #[serde(rename = "missingSourceFields")]
    pub missing_source_fields: Vec<String>,
    #[serde(rename = "executionError")]
    pub execution_error: Option<String>,
    #[serde(rename = "fieldsWithNoValues")]
    pub fields_with_no_values: Vec<String>,
    #[serde(rename = "fieldsWithSparseValues")]
    pub fields_with_sparse_values: Vec<SparseField>,
}

impl IssueSummary {
    /// A spec has issues iff any of the summary's fields is non-empty.
    pub fn has_issues(&self) -> bool {
        self.execution_error.is_some()
            || !self.validation_errors.is_empty()
            || !self.missing_source_fields.is_empty()
            || !self.fields_with_no_values.is_empty()
            || !self.fields_with_sparse_values.is_empty()
    }
}

/// Recursively collect every leaf `{target_path: source}` pair out of an
/// `items.map` block, descending into nested `{path, map}` blocks and
/// qualifying their targets with a dotted prefix.
fn collect_leaf_sources(map_block: &Map<String, Value>, prefix: &str) -> BTreeMap<String, Option<Value>> {
    let mut leaves = BTreeMap::new();
    for (target_field, spec) in map_block {
        let Some(spec_obj) = spec.as_object() else { continue };
        let target_path = if prefix.is_empty() {
            target_field.clone()
        } else {
            format!("{prefix}{target_field}")
        };
        let nested_map = spec_obj.get("map").and_then(Value::as_object);
        if spec_obj.contains_key("path") && nested_map.is_some() {
            let nested_prefix = format!("{target_path}.");
            leaves.extend(collect_leaf_sources(nested_map.unwrap(), &nested_prefix));
            continue;
        }
        leaves.insert(target_path, spec_obj.get("source").cloned());
    }
    leaves
}

fn is_missing_source(source: &Option<Value>) -> bool {
    match source {
        None => true,
        Some(Value::Null) => true,
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

fn is_missing_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn get_nested(data: &Value, dotted_path: &str) -> Option<Value> {
    let mut cursor = data;
    for part in dotted_path.split('.') {
        if cursor.is_array() {
            return Some(cursor.clone());
        }
        cursor = cursor.as_object()?.get(part)?;
    }
    Some(cursor.clone())
}

/// Produce the issue summary for `mapping_spec` against `payload`, also
/// returning the execution result when execution succeeded (spec.md
/// §4.H.1).
pub fn summarize_mapping_issues(
    mapping_spec: &Value,
    payload: &Value,
    target_paths: &[String],
) -> (IssueSummary, Option<Value>) {
    let mut issues = IssueSummary::default();

    let validation_errors = validate_mapping_spec(mapping_spec);
    if !validation_errors.is_empty() {
        issues.validation_errors = validation_errors;
    }

    if let Some(items_map) = mapping_spec
        .get("mappings")
        .and_then(Value::as_object)
        .and_then(|m| m.get("items"))
        .and_then(Value::as_object)
        .and_then(|i| i.get("map"))
        .and_then(Value::as_object)
    {
        let leaf_sources = collect_leaf_sources(items_map, "");
        let mut missing: Vec<String> = leaf_sources
            .into_iter()
            .filter(|(_, source)| is_missing_source(source))
            .map(|(field, _)| field)
            .collect();
        missing.truncate(MISSING_FIELD_CAP);
        issues.missing_source_fields = missing;
    }

    let result = match execute(mapping_spec, target_paths, payload) {
        Ok(result) => result,
        Err(err) => {
            issues.execution_error = Some(err.to_string());
            return (issues, None);
        }
    };

    let items = result.get("items").and_then(Value::as_array);
    let items = match items {
        Some(items) if !items.is_empty() => items,
        _ => {
            issues.execution_error = Some("Mapping output has no items.".to_string());
            return (issues, Some(result));
        }
    };

    let total = items.len();
    let mut fields_with_no_values = Vec::new();
    let mut fields_with_sparse_values = Vec::new();
    for target_path in target_paths {
        let non_null = items
            .iter()
            .filter(|item| {
                get_nested(item, target_path)
                    .map(|v| !is_missing_value(&v))
                    .unwrap_or(false)
            })
            .count();
        if non_null == 0 {
            fields_with_no_values.push(target_path.clone());
        } else if non_null < total && (non_null as f64 / total as f64) < SPARSITY_THRESHOLD {
            fields_with_sparse_values.push(SparseField {
                field: target_path.clone(),
                non_null,
                total,
            });
        }
    }
    fields_with_no_values.truncate(MISSING_FIELD_CAP);
    fields_with_sparse_values.truncate(MISSING_FIELD_CAP);
    issues.fields_with_no_values = fields_with_no_values;
    issues.fields_with_sparse_values = fields_with_sparse_values;

    (issues, Some(result))
}

/// Build a base mapping spec (step 1 of spec.md §4.H): accept a list-shaped
/// or nested-shaped partner spec as-is (the caller is expected to have
/// already run it through [`repair`] if it might be the legacy dialect),
/// otherwise ask the oracle, falling back to the Auto-Mapper.
fn build_base_spec(
    partner_spec: Option<&Value>,
    payload: &Value,
    target_schema: &Value,
    oracle: &dyn Oracle,
) -> Value {
    if let Some(partner_spec) = partner_spec {
        if matches!(partner_spec.get("mappings"), Some(Value::Array(_)) | Some(Value::Object(_))) {
            let (repaired, _) = repair(partner_spec, None);
            if let Some(repaired) = repaired {
                return repaired;
            }
        }
    }

    let items_path = choose_items_path(payload);
    let input_schema = fingerprint(payload, &FingerprintOptions { max_items_per_array: Some(10) });
    let prompt = build_generation_prompt(&input_schema_to_value(&input_schema), target_schema, items_path);
    if let Some(raw_text) = oracle.complete(&prompt) {
        let (repaired, _) = repair(&Value::String(raw_text), None);
        if let Some(repaired) = repaired {
            return repaired;
        }
    }
    auto_mapping_spec(payload, target_schema)
}

fn input_schema_to_value(schema: &crate::fingerprint::Fingerprint) -> Value {
    let map: Map<String, Value> = schema
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    Value::Object(map)
}

fn build_generation_prompt(input_schema: &Value, target_schema: &Value, items_path: &str) -> String {
    format!(
        "You are an expert data mapper. Generate a JSON mapping spec in the normative format.\n\
         Return ONLY valid JSON (no markdown, no extra text).\n\n\
         Rules:\n\
         - The output must be a JSON object with keys: version, defaults, broadcast, mappings.\n\
         - mappings.items.path must be the JSONPath array: \"{items_path}\".\n\
         - mappings.items.map should map target fields to source paths.\n\
         - Use JSONPath strings that start with '$.' for sources.\n\
         - If you cannot find a source for a target, set source to null.\n\
         - Do not invent fields that are not in the target schema.\n\n\
         Input schema (JSONPath -> type):\n{input_schema}\n\n\
         Target schema (JSON or JSONPath map):\n{target_schema}\n"
    )
}

fn build_refinement_prompt(
    input_schema: &Value,
    target_schema: &Value,
    items_path: &str,
    mapping_spec: &Value,
    issues: &IssueSummary,
    input_preview: &[Value],
    output_preview: &[Value],
) -> String {
    format!(
        "You previously generated this mapping spec; it has issues. Return an improved, complete\n\
         JSON mapping spec (same shape, no markdown, no extra text).\n\n\
         mappings.items.path must remain: \"{items_path}\".\n\n\
         Current spec:\n{mapping_spec}\n\n\
         Issues:\n{issues}\n\n\
         Input schema (JSONPath -> type):\n{input_schema}\n\n\
         Target schema:\n{target_schema}\n\n\
         Input preview rows:\n{input_preview}\n\n\
         Output preview rows:\n{output_preview}\n",
        issues = serde_json::to_string(issues).unwrap_or_default(),
        input_preview = Value::Array(input_preview.to_vec()),
        output_preview = Value::Array(output_preview.to_vec()),
    )
}

fn extract_output_preview(result: Option<&Value>, limit: usize) -> Vec<Value> {
    result
        .and_then(|r| r.get("items"))
        .and_then(Value::as_array)
        .map(|items| items.iter().filter(|v| v.is_object()).take(limit).cloned().collect())
        .unwrap_or_default()
}

/// Run the bounded refinement loop (spec.md §4.H), returning the final
/// mapping spec. `target_paths` must be the normalized, item-relative
/// canonical paths (see [`crate::flatten::canonical_item_paths`]).
///
/// Equivalent to [`run_cancellable`] with a canceller that never fires.
pub fn run(
    partner_spec: Option<&Value>,
    payload: &Value,
    target_schema: &Value,
    target_paths: &[String],
    options: RefinementOptions,
    oracle: &dyn Oracle,
    input_preview: &[Value],
) -> Value {
    run_cancellable(
        partner_spec,
        payload,
        target_schema,
        target_paths,
        options,
        oracle,
        input_preview,
        &|| false,
    )
}

/// Run the bounded refinement loop with a cancellation check (spec.md §5:
/// "the caller must be able to abort a mapping before the next oracle call
/// between iterations"). `cancelled` is polled once at the top of every
/// iteration, before the repair/execute/oracle round-trip for that
/// iteration begins; it is never polled mid-iteration, since the executor
/// itself is treated as uncancellable.
pub fn run_cancellable(
    partner_spec: Option<&Value>,
    payload: &Value,
    target_schema: &Value,
    target_paths: &[String],
    options: RefinementOptions,
    oracle: &dyn Oracle,
    input_preview: &[Value],
    cancelled: &dyn Fn() -> bool,
) -> Value {
    let options = options.normalized();
    info!(max_iterations = options.max_iterations, "refinement loop starting");

    let items_path = choose_items_path(payload);
    let input_schema = fingerprint(payload, &FingerprintOptions { max_items_per_array: Some(10) });
    let input_schema_value = input_schema_to_value(&input_schema);

    let mut current = build_base_spec(partner_spec, payload, target_schema, oracle);
    let allowed: std::collections::BTreeSet<String> = target_paths.iter().cloned().collect();

    for iteration in 0..options.max_iterations {
        if cancelled() {
            info!(iteration, "refinement cancelled by caller");
            return current;
        }
        debug!(iteration, "refinement iteration start");
        let (repaired, _) = repair(&current, Some(&allowed));
        current = repaired.unwrap_or_else(|| auto_mapping_spec(payload, target_schema));

        let (issues, result) = summarize_mapping_issues(&current, payload, target_paths);
        if !issues.has_issues() {
            info!("refinement converged with no remaining issues");
            return current;
        }
        info!(
            validation_errors = issues.validation_errors.len(),
            missing_sources = issues.missing_source_fields.len(),
            no_values = issues.fields_with_no_values.len(),
            sparse = issues.fields_with_sparse_values.len(),
            execution_error = issues.execution_error.is_some(),
            "refinement issues found"
        );

        let prompt = build_refinement_prompt(
            &input_schema_value,
            target_schema,
            items_path,
            &current,
            &issues,
            input_preview,
            &extract_output_preview(result.as_ref(), 3),
        );
        let Some(raw_text) = oracle.complete(&prompt) else {
            warn!("refinement stopping: oracle returned nothing");
            return current;
        };
        let (improved, _) = repair(&Value::String(raw_text), Some(&allowed));
        match improved {
            Some(improved) if improved != current => {
                current = improved;
            }
            _ => {
                info!("refinement stopping: oracle produced no improvement");
                return current;
            }
        }
    }

    info!("refinement reached max iterations");
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StubOracle(std::cell::RefCell<Vec<Option<String>>>);

    impl Oracle for StubOracle {
        fn complete(&self, _prompt: &str) -> Option<String> {
            self.0.borrow_mut().pop()
        }
    }

    #[test]
    fn collects_leaf_sources_recursively() {
        let map_block: Map<String, Value> = serde_json::from_value(json!({
            "id": {"source": "$.id"},
            "lines": {"path": "$.lines[]", "map": {"sku": {"source": null}}}
        }))
        .unwrap();
        let leaves = collect_leaf_sources(&map_block, "");
        assert_eq!(leaves["id"], Some(json!("$.id")));
        assert_eq!(leaves["lines.sku"], Some(Value::Null));
    }

    #[test]
    fn issue_summary_detects_missing_source_and_no_values() {
        let spec = json!({
            "mappings": {"items": {"path": "$.items[]", "map": {
                "sku": {"source": Value::Null}
            }}}
        });
        let payload = json!({"items": [{"sku": "A"}]});
        let (issues, _) = summarize_mapping_issues(&spec, &payload, &["sku".to_string()]);
        assert_eq!(issues.missing_source_fields, vec!["sku".to_string()]);
        assert_eq!(issues.fields_with_no_values, vec!["sku".to_string()]);
        assert!(issues.has_issues());
    }

    #[test]
    fn issue_summary_flags_sparse_values() {
        let spec = json!({
            "mappings": {"items": {"path": "$.items[]", "map": {
                "sku": {"source": "$.sku"}
            }}}
        });
        let payload = json!({"items": [{"sku": "A"}, {}, {}, {}]});
        let (issues, _) = summarize_mapping_issues(&spec, &payload, &["sku".to_string()]);
        assert_eq!(issues.fields_with_sparse_values.len(), 1);
        assert_eq!(issues.fields_with_sparse_values[0].non_null, 1);
        assert_eq!(issues.fields_with_sparse_values[0].total, 4);
    }

    #[test]
    fn execution_with_no_items_is_reported_as_execution_error() {
        let spec = json!({
            "mappings": {"items": {"path": "$.missing[]", "map": {}}}
        });
        let payload = json!({"items": []});
        let (issues, _) = summarize_mapping_issues(&spec, &payload, &[]);
        assert_eq!(issues.execution_error.as_deref(), Some("Mapping output has no items."));
    }

    /// Scenario 6 (spec.md §8): no oracle available stops after one pass.
    #[test]
    fn stops_immediately_when_no_oracle_available() {
        let payload = json!({"items": [{"id": 1}]});
        let target_schema = json!({"items": [{"id": "string"}]});
        let result = run(
            None,
            &payload,
            &target_schema,
            &["id".to_string()],
            RefinementOptions { enabled: true, max_iterations: 5 },
            &crate::oracle::NoOracle,
            &[],
        );
        assert_eq!(result["mappings"]["items"]["map"]["id"]["source"], json!("$.id"));
    }

    /// Scenario 5 (spec.md §8): refinement converges once the oracle
    /// supplies a spec with no remaining issues.
    #[test]
    fn converges_once_oracle_fills_gap() {
        let payload = json!({"items": [{"sku": "A"}]});
        let target_schema = json!({"items": [{"sku": "string"}]});
        let improved = json!({
            "mappings": {"items": {"path": "$.items[]", "map": {
                "sku": {"source": "$.sku"}
            }}}
        })
        .to_string();
        let oracle = StubOracle(std::cell::RefCell::new(vec![improved]));
        let result = run(
            Some(&json!({"mappings": {"items": {"path": "$.items[]", "map": {
                "sku": {"source": Value::Null}
            }}}})),
            &payload,
            &target_schema,
            &["sku".to_string()],
            RefinementOptions { enabled: true, max_iterations: 3 },
            &oracle,
            &[],
        );
        assert_eq!(result["mappings"]["items"]["map"]["sku"]["source"], json!("$.sku"));
    }

    /// spec.md §5: the caller can abort before the next oracle call between
    /// iterations; a canceller that fires immediately must stop the loop
    /// without ever invoking the oracle.
    #[test]
    fn run_cancellable_stops_before_first_iteration_when_already_cancelled() {
        let payload = json!({"items": [{"sku": "A"}]});
        let target_schema = json!({"items": [{"sku": "string"}]});
        // A usable partner spec means `build_base_spec` takes it as-is
        // without ever consulting the oracle, so the only place the oracle
        // could be invoked is inside the loop body.
        let partner_spec = json!({
            "mappings": {"items": {"path": "$.items[]", "map": {
                "sku": {"source": Value::Null}
            }}}
        });
        let oracle = StubOracle(std::cell::RefCell::new(vec!["should never be read".to_string()]));
        let result = run_cancellable(
            Some(&partner_spec),
            &payload,
            &target_schema,
            &["sku".to_string()],
            RefinementOptions { enabled: true, max_iterations: 3 },
            &oracle,
            &[],
            &|| true,
        );
        assert_eq!(result["mappings"]["items"]["map"]["sku"]["source"], Value::Null);
        assert_eq!(oracle.0.borrow().len(), 1, "oracle must not have been consumed");
    }
}
