//! Payload analysis: schema fingerprint + preview rows + structural issue
//! detection (spec.md §6 `AnalyzePayload`).
//!
//! Grounded in `examples/original_source/backend/mapping_service.py`
//! (`analyze_payload`/`_extract_preview_rows`/`_detect_issues`).

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::FingerprintOptions;
use crate::fingerprint::{fingerprint, Fingerprint};

const DEFAULT_MAX_ITEMS_PER_ARRAY: usize = 10;
const DEFAULT_PREVIEW_LIMIT: usize = 3;

/// One structural issue found while sampling preview rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayloadIssue {
    pub field: String,
    pub level: String,
    pub message: String,
}

/// The result of analyzing a raw payload before any mapping spec exists.
#[derive(Debug, Clone, Serialize)]
pub struct PayloadAnalysis {
    pub schema: Fingerprint,
    pub preview: Vec<Value>,
    pub issues: Vec<PayloadIssue>,
}

/// Analyze `payload`: fingerprint its schema, sample up to
/// [`DEFAULT_PREVIEW_LIMIT`] item rows, and flag mixed-type or missing-value
/// fields within that sample.
pub fn analyze_payload(payload: &Value) -> PayloadAnalysis {
    let schema = fingerprint(
        payload,
        &FingerprintOptions {
            max_items_per_array: Some(DEFAULT_MAX_ITEMS_PER_ARRAY),
        },
    );
    let preview = extract_preview_rows(payload, DEFAULT_PREVIEW_LIMIT);
    let issues = detect_issues(&preview);
    PayloadAnalysis {
        schema,
        preview,
        issues,
    }
}

/// Sample up to `limit` object rows from a list payload, or from the
/// `items` array of an object payload.
pub fn extract_preview_rows(data: &Value, limit: usize) -> Vec<Value> {
    match data {
        Value::Array(items) => items
            .iter()
            .filter(|v| v.is_object())
            .take(limit)
            .cloned()
            .collect(),
        Value::Object(map) => match map.get("items") {
            Some(Value::Array(items)) => items
                .iter()
                .filter(|v| v.is_object())
                .take(limit)
                .cloned()
                .collect(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn detect_issues(rows: &[Value]) -> Vec<PayloadIssue> {
    let mut issues = Vec::new();
    if rows.is_empty() {
        return issues;
    }

    let mut field_types: BTreeMap<String, BTreeSet<&'static str>> = BTreeMap::new();
    let mut null_fields: BTreeMap<String, usize> = BTreeMap::new();

    for row in rows {
        let Some(obj) = row.as_object() else { continue };
        for (key, value) in obj {
            if is_empty_value(value) {
                *null_fields.entry(key.clone()).or_insert(0) += 1;
                continue;
            }
            field_types.entry(key.clone()).or_default().insert(type_name(value));
        }
    }

    for (field, types) in &field_types {
        if types.len() > 1 {
            let joined: Vec<&str> = types.iter().copied().collect();
            issues.push(PayloadIssue {
                field: field.clone(),
                level: "warning".to_string(),
                message: format!("Mixed value types detected ({}).", joined.join(", ")),
            });
        }
    }
    for (field, count) in &null_fields {
        issues.push(PayloadIssue {
            field: field.clone(),
            level: "warning".to_string(),
            message: format!("{count} sample rows missing values."),
        });
    }

    issues
}

fn is_empty_value(value: &Value) -> bool {
    matches!(value, Value::Null) || matches!(value, Value::String(s) if s.is_empty())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "NoneType",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "int",
        Value::Number(_) => "float",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

impl PayloadAnalysis {
    /// Serialize to the adapter-facing `{"schema", "preview", "issues"}`
    /// shape (spec.md §6).
    pub fn to_json(&self) -> Value {
        let schema: Map<String, Value> = self
            .schema
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let mut out = Map::new();
        out.insert("schema".to_string(), Value::Object(schema));
        out.insert("preview".to_string(), Value::Array(self.preview.clone()));
        out.insert(
            "issues".to_string(),
            serde_json::to_value(&self.issues).unwrap_or(Value::Array(Vec::new())),
        );
        Value::Object(out)
    }
}
