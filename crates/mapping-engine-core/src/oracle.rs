//! The LLM adapter seam (spec.md §9 DESIGN NOTES, "LLM coupling").
//!
//! The source backend calls Bedrock directly from the service layer
//! (`_invoke_bedrock`/`_get_bedrock_client` in
//! `examples/original_source/backend/mapping_service.py`). This crate never
//! depends on a concrete model-provider SDK: the refinement loop is generic
//! over anything implementing [`Oracle`], and adapters (CLI, HTTP service,
//! etc.) supply the concrete client.

/// A text-in, text-out completion oracle used by the refinement loop to
/// request an improved mapping spec.
///
/// Implementations should return `None` on any failure (network error,
/// missing credentials, empty response) rather than propagating an error —
/// the refinement loop treats "no oracle available" and "oracle failed" the
/// same way: stop refining and return the current mapping (mirrors
/// `_generate_mapping_with_agent`'s early-return behavior when Bedrock is
/// unavailable or returns nothing).
pub trait Oracle {
    fn complete(&self, prompt: &str) -> Option<String>;
}

/// An oracle that never produces a completion. Used when refinement is
/// requested but no concrete oracle was wired up; the loop degrades to a
/// single repair-and-execute pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOracle;

impl Oracle for NoOracle {
    fn complete(&self, _prompt: &str) -> Option<String> {
        None
    }
}
