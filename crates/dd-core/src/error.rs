use thiserror::Error;

/// Top-level error type for the dd-core crate and dependents.
#[derive(Debug, Error)]
pub enum DdError {
    #[error("schema error: {0}")]
    Schema(String),

    #[error("apply failed: {op} at '{path}': {reason}")]
    Apply {
        /// Name of the delta operation that failed (e.g. `"seq_remove_at"`).
        op: String,
        /// Dot/bracket member path of the failing operation.
        path: String,
        /// Human-readable cause (index out of range, missing key, ...).
        reason: String,
    },

    #[error("wire format error: {0}")]
    Wire(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown type tag: {0}")]
    UnknownType(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl DdError {
    /// Shorthand for the structured apply error.
    pub fn apply(op: &str, path: &str, reason: impl Into<String>) -> Self {
        DdError::Apply {
            op: op.to_string(),
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// Convenience Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, DdError>;
