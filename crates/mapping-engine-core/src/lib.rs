//! A JSON mapping engine: takes a partner payload plus a declarative
//! mapping spec and produces canonical items, with supporting machinery to
//! infer, repair, validate and iteratively refine that spec.
//!
//! Grounded throughout in `examples/original_source/backend/` (the
//! Python service this crate supersedes) and in the teacher crate's module
//! layout and error/config conventions — see `DESIGN.md` at the workspace
//! root for the full grounding ledger.

pub mod analyze;
pub mod automap;
pub mod config;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod flatten;
pub mod oracle;
pub mod path;
pub mod refine;
pub mod repair;
pub mod spec;
pub mod validate;

pub use analyze::{analyze_payload, PayloadAnalysis, PayloadIssue};
pub use automap::auto_mapping_spec as auto_mapping;
pub use config::{FingerprintOptions, RefinementOptions};
pub use error::{ErrorCode, MappingError};
pub use executor::execute;
pub use fingerprint::{fingerprint, Fingerprint};
pub use flatten::{canonical_item_paths, flatten_target_schema};
pub use oracle::{NoOracle, Oracle};
pub use refine::{run as refine, run_cancellable as refine_cancellable, IssueSummary, SparseField};
pub use repair::repair;
pub use validate::validate_mapping_spec as validate;

use serde_json::Value;

/// Top-level convenience entry point combining auto-mapping, repair,
/// validation and optional LLM-assisted refinement into one call (spec.md
/// §6 `prepare_mapping`, §4.H Refinement Loop).
///
/// When `refinement.enabled` is `false`, this produces a base spec (partner
/// spec if usable, otherwise the Auto-Mapper's guess) and repairs it once
/// against `target_paths` — no executor or oracle round-trips happen.
pub fn prepare_mapping(
    partner_spec: Option<&Value>,
    payload: &Value,
    target_schema: &Value,
    refinement: RefinementOptions,
    oracle: &dyn Oracle,
) -> Value {
    let flattened = flatten::flatten_target_schema(target_schema);
    let target_paths = flatten::canonical_item_paths(&flattened);
    let input_preview = analyze::extract_preview_rows(payload, 3);

    if !refinement.enabled {
        let base = match partner_spec {
            Some(spec) if matches!(spec.get("mappings"), Some(Value::Array(_)) | Some(Value::Object(_))) => {
                spec.clone()
            }
            _ => automap::auto_mapping_spec(payload, target_schema),
        };
        let allowed = target_paths.iter().cloned().collect();
        let (repaired, _) = repair::repair(&base, Some(&allowed));
        return repaired.unwrap_or_else(|| automap::auto_mapping_spec(payload, target_schema));
    }

    refine::run(
        partner_spec,
        payload,
        target_schema,
        &target_paths,
        refinement,
        oracle,
        &input_preview,
    )
}
