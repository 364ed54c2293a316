//! Error types for the sync engine.

use thingsync_cloud::CloudError;
use thingsync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A queue item's payload does not fit its kind. Never retried.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] ProtocolError),

    /// The remote store could not be read or written.
    #[error("remote store error: {0}")]
    Remote(#[from] CloudError),

    /// A queue item failed on every allowed attempt.
    #[error("retries exhausted after {attempts} attempts")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// The sync queue was cancelled and accepts no more work.
    #[error("sync queue is closed")]
    QueueClosed,

    /// A reconciliation pass is already running.
    #[error("reconciliation pass already in progress")]
    ReconcileInProgress,

    /// No tokio runtime is available to drive timers.
    #[error("no tokio runtime available")]
    NoRuntime,
}

impl SyncError {
    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(e) => e.is_transient(),
            SyncError::ReconcileInProgress => true,
            _ => false,
        }
    }
}
