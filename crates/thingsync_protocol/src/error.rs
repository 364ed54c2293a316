//! Error types for the protocol crate.

use crate::job::JobKind;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding or validating protocol data.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A queue payload is structurally invalid for its kind.
    #[error("invalid {kind:?} payload: {reason}")]
    InvalidPayload {
        /// Kind of the rejected job.
        kind: JobKind,
        /// What was wrong with it.
        reason: String,
    },

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Creates an invalid payload error.
    pub fn invalid_payload(kind: JobKind, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            kind,
            reason: reason.into(),
        }
    }
}
