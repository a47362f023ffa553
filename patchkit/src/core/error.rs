//! Typed engine errors.

use serde::Serialize;
use thiserror::Error;

use super::dom::DomError;

/// Per-operation failure. Never aborts a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatchError {
    #[error("selector `{selector}` matched no element")]
    SelectorNotFound { selector: String },
    #[error("selector `{selector}` is invalid: {message}")]
    InvalidSelector { selector: String, message: String },
    #[error("cannot move `{selector}` into its own subtree (`{target}`)")]
    CircularMove { selector: String, target: String },
    #[error("refusing unsafe url `{url}` for attribute `{attribute}`")]
    UnsafeUrl { attribute: String, url: String },
    #[error("refusing event handler attribute `{name}`")]
    UnsafeAttribute { name: String },
    #[error("`{selector}` has no parent element to insert next to")]
    MissingParent { selector: String },
    #[error("invalid operation: {message}")]
    InvalidOperation { message: String },
}

impl From<DomError> for PatchError {
    fn from(err: DomError) -> Self {
        PatchError::InvalidOperation {
            message: err.to_string(),
        }
    }
}

/// Boundary failure for a whole payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported payload version {0} (expected 1)")]
    UnsupportedVersion(u32),
    #[error("payload failed validation: {}", .0.join("; "))]
    Invalid(Vec<String>),
}
