//! Configuration surface for the mapping engine.
//!
//! ## Serialization Format
//!
//! Fields are serialized in `kebab-case` (e.g., `max-items-per-array`,
//! `max-iterations`), matching the teacher crate's convention for options
//! structs that travel through config files and adapter request bodies.

use serde::{Deserialize, Serialize};

/// Options for the Schema Fingerprinter (spec.md §4.B).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FingerprintOptions {
    /// Bounds how many array elements contribute to the fingerprint.
    /// `None` means unlimited.
    pub max_items_per_array: Option<usize>,
}

impl Default for FingerprintOptions {
    fn default() -> Self {
        Self {
            max_items_per_array: None,
        }
    }
}

/// Options for the Refinement Loop (spec.md §4.H).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RefinementOptions {
    /// Whether the refinement loop runs at all. When `false`,
    /// `prepare_mapping` stops after producing and repairing a base spec.
    pub enabled: bool,
    /// Bounded to `[1, 5]` by `normalized()` — never trust a caller-supplied
    /// value directly (mirrors `_parse_mapping_agent_options` in the source
    /// backend, which clamps the same way).
    pub max_iterations: usize,
}

impl Default for RefinementOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            max_iterations: 3,
        }
    }
}

impl RefinementOptions {
    /// Clamp `max_iterations` into `[1, 5]` per spec.md §4.H.
    pub fn normalized(self) -> Self {
        Self {
            enabled: self.enabled,
            max_iterations: self.max_iterations.clamp(1, 5),
        }
    }
}
