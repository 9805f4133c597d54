//! Typed error hierarchy for tasklane.
//!
//! `BoardError` covers everything the ordering engine, the store and the
//! board service can report. Validation and not-found errors are raised
//! before any write; `ConcurrencyConflict` means the store could not take
//! its write lock in time and nothing was applied; `BroadcastFailure` is
//! only ever reported after the mutation has committed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Item {id} not found")]
    ItemNotFound { id: i64 },

    #[error("Column {id} not found")]
    ColumnNotFound { id: i64 },

    #[error("Board {id} not found")]
    BoardNotFound { id: i64 },

    #[error("Concurrent modification conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Broadcast for board {board_id} failed: {message}")]
    BroadcastFailure { board_id: i64, message: String },

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BoardError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ItemNotFound { .. } | Self::ColumnNotFound { .. } | Self::BoardNotFound { .. }
        )
    }

    /// Conflicts are the only errors worth retrying: nothing was written.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict(_))
    }
}

impl From<rusqlite::Error> for BoardError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                Self::ConcurrencyConflict(err.to_string())
            }
            _ => Self::Database(err.into()),
        }
    }
}

pub type BoardResult<T> = std::result::Result<T, BoardError>;
