//! Mapping Spec model — the two dialects and the transform vocabulary
//! (spec.md §3, DESIGN NOTES "Spec polymorphism").
//!
//! Repair is the only stage that accepts the union of dialects; it produces
//! the normative (nested) dialect for everything downstream. Both stages and
//! the executor otherwise work directly on `serde_json::Value`, matching the
//! JSON-native shape of a mapping spec rather than round-tripping through an
//! intermediate typed tree — the legacy dialect is the one place a typed
//! `Deserialize` struct pays for itself, since its shape is fixed and flat.

use serde::Deserialize;
use serde_json::Value;

/// Source path prefixes that address feed-level (not item-level) data.
/// A source under one of these, found in an item-context leaf, is relocated
/// to `broadcast` by repair (spec.md §4.D) and flagged by validate (§4.E).
pub const FEED_LEVEL_PREFIXES: &[&str] = &[
    "$.feed_metadata",
    "$.meta",
    "$.source",
    "$.partner",
    "$.schema_version",
    "$.default_operation_type",
];

/// A leaf-spec transform, after resolving legacy synonyms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    EnsureArray,
    ToFloat,
    ToInt,
    ToString,
    ToBoolean,
}

impl Transform {
    /// Resolve a transform name, accepting the legacy synonyms spec.md §3
    /// requires the executor to honor (`number`→`to_float`, `integer`→
    /// `to_int`, `string`/`date`→`to_string`, `boolean`→`to_boolean`).
    pub fn parse(name: &str) -> Option<Transform> {
        match name {
            "ensure_array" => Some(Transform::EnsureArray),
            "to_float" | "number" => Some(Transform::ToFloat),
            "to_int" | "integer" => Some(Transform::ToInt),
            "to_string" | "string" | "date" => Some(Transform::ToString),
            "to_boolean" | "boolean" => Some(Transform::ToBoolean),
            _ => None,
        }
    }
}

/// The legacy flat dialect (spec.md §3): `{targetSchema?, mappings: [...],
/// defaults?}`. Only ever consumed by `repair`, which converts it into the
/// normative nested dialect.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyMappingSpec {
    #[serde(rename = "targetSchema", default)]
    pub target_schema: Option<Value>,
    pub mappings: Vec<LegacyMappingEntry>,
    #[serde(default)]
    pub defaults: serde_json::Map<String, Value>,
}

/// A single entry of the legacy dialect's `mappings` list.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyMappingEntry {
    pub target: String,
    #[serde(default)]
    pub source: Option<Value>,
    #[serde(default)]
    pub transform: Option<String>,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "match", default)]
    pub match_map: Option<serde_json::Map<String, Value>>,
}

/// Resolve a legacy entry's `transform` string into the normative transform
/// name stored on a normative leaf spec (mirrors `_mapping_transform` in the
/// source backend — `None` means "no transform key at all", not a parse
/// failure).
pub fn legacy_transform_name(transform: Option<&str>) -> Option<&'static str> {
    match transform? {
        "string" | "date" => Some("to_string"),
        "number" => Some("to_float"),
        "integer" => Some("to_int"),
        "boolean" => Some("to_boolean"),
        _ => None,
    }
}
