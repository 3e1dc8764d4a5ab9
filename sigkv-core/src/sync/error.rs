//! Sync error types.

use crate::storage::StorageError;

/// Errors that escape a sync operation.
///
/// Rejected documents and unreachable pubs are not errors; they are folded
/// into counts and endpoint state. What remains is storage failure and
/// requests for unsupported modes.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Continuous (live) sync was requested.
    #[error("live sync is not supported; run a one-shot sync instead")]
    LiveSyncUnsupported,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failures talking to a pub. Absorbed by the remote sync pass.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(u16),
    #[error("malformed response body: {0}")]
    MalformedBody(String),
}
