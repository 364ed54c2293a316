//! Error types for remote stores.

use thingsync_protocol::DeviceId;
use thiserror::Error;

/// Result type for remote store operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors that can occur while talking to a remote store.
///
/// The sync engine treats every variant as a transport failure: the
/// operation is retried with backoff, never applied partially.
#[derive(Error, Debug)]
pub enum CloudError {
    /// The store cannot be reached.
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    /// A thing with this ID is already registered.
    #[error("thing already registered: {0}")]
    AlreadyExists(DeviceId),

    /// The persisted data could not be decoded or encoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CloudError {
    /// Returns true if repeating the request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, CloudError::Unavailable(_) | CloudError::Io(_))
    }
}
