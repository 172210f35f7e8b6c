//! Error types for tracker operations.

use stepwise_database::DatabaseError;
use thiserror::Error;

/// Errors that can occur in the state controller.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Persistence failed and no fallback applies.
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// A referenced procedure is not in the session state.
    #[error("unknown procedure: {0}")]
    UnknownProcedure(String),

    /// A referenced step is not part of its procedure.
    #[error("unknown step: {0}")]
    UnknownStep(String),

    /// The snapshot store failed to read or write.
    #[error("snapshot store error: {0}")]
    Snapshot(String),
}
