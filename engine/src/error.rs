//! Error types for the Stockpile engine and client.

use crate::RecordId;
use thiserror::Error;

/// All possible errors surfaced by sync operations.
///
/// Errors are `Clone + Eq` so they can be stored inside the projected
/// [`SyncState`](crate::SyncState) and compared by observers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Remote errors
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    // Data errors
    #[error("invalid record: {0}")]
    Validation(String),

    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    // Local errors
    #[error("local store failure: {0}")]
    Persistence(String),

    // Engine errors
    #[error("not ready to sync: {0}")]
    NotReady(String),

    #[error("operation requires connectivity")]
    Disconnected,

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Whether the error is expected to clear up on the next sync trigger.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Disconnected | Error::Cancelled)
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, Error>;
