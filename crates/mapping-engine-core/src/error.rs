//! Error types for the mapping engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable, machine-readable error codes for adapters.
///
/// These codes form a **stable API contract** — once published, variant names
/// and their serialized `snake_case` strings must never change across versions.
/// HTTP adapters map these to status codes and job-failure reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorCode {
    /// The mapping spec is not shaped as a map, or a required sub-object is missing.
    MalformedSpec,
    /// A structural path is not a string, or uses a forbidden token.
    MalformedPath,
    /// JSON (de)serialization error.
    JsonParseError,
}

/// The only two fatal error kinds the engine raises (spec.md §7).
///
/// `TransformFailure`, `MissingField` and `CanonicalConflict` are *not*
/// represented here — they are recovered locally by the executor
/// (substituting `null` or skipping a field) and never surface as errors.
/// `UnparseableOracleOutput` is likewise not an error: `repair::repair`
/// returns `(None, repairs)` for unrecoverable text instead of raising.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("malformed mapping spec at {path}: {message}")]
    MalformedSpec { path: String, message: String },

    #[error("malformed path in {context}: {path}")]
    MalformedPath { context: String, path: String },

    #[error("JSON (de)serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl MappingError {
    /// Returns the stable error code for this error variant.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            MappingError::MalformedSpec { .. } => ErrorCode::MalformedSpec,
            MappingError::MalformedPath { .. } => ErrorCode::MalformedPath,
            MappingError::JsonError(_) => ErrorCode::JsonParseError,
        }
    }

    /// Produces a structured JSON error for adapter consumers.
    ///
    /// Format: `{"code": "...", "message": "..."}`
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.error_code(),
            "message": self.to_string(),
        })
    }
}
