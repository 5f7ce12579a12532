//! Error types for the iprop log engine.

use std::io;
use thiserror::Error;

/// Result type for log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Errors that can occur in log operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(iprop_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The log's framing or sequencing is broken.
    #[error("log corrupt: {message}")]
    Corrupt {
        /// Description of the corruption.
        message: String,
    },

    /// No more records in the requested direction.
    #[error("end of log")]
    EndOfLog,

    /// The log predates the uber record format.
    #[error("log needs upgrade: no uber record")]
    NeedsUpgrade,

    /// The session does not hold the exclusive lock.
    #[error("log is read-only")]
    ReadOnly,

    /// A non-blocking open found the log locked.
    #[error("log is locked by another process")]
    Locked,

    /// Truncation found no record within the requested limits.
    #[error("nothing to keep: no record fits the truncation limits")]
    NothingToKeep,

    /// The principal already exists in the database.
    #[error("principal already exists: {principal}")]
    EntryExists {
        /// The principal, rendered as `name@REALM`.
        principal: String,
    },

    /// The principal does not exist in the database.
    #[error("principal not found: {principal}")]
    EntryNotFound {
        /// The principal, rendered as `name@REALM`.
        principal: String,
    },

    /// Any other failure reported by the principal database.
    #[error("database error: {message}")]
    Database {
        /// Description of the failure.
        message: String,
    },

    /// A record payload could not be decoded.
    #[error("invalid payload: {message}")]
    InvalidPayload {
        /// Description of the problem.
        message: String,
    },

    /// A caller passed an argument the log cannot honour.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },
}

impl LogError {
    /// Creates a corruption error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    /// Creates a payload decoding error.
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            message: message.into(),
        }
    }

    /// Creates a generic database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Returns true for [`LogError::Corrupt`].
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }

    /// Returns true for [`LogError::EndOfLog`].
    #[must_use]
    pub fn is_end_of_log(&self) -> bool {
        matches!(self, Self::EndOfLog)
    }

    /// Returns true for the errors a forward walk treats as a damaged tail.
    #[must_use]
    pub fn is_damaged_tail(&self) -> bool {
        self.is_corrupt() || self.is_end_of_log()
    }

    /// Returns true for database outcomes that are expected while replaying
    /// records the database may already reflect.
    #[must_use]
    pub fn is_benign_during_replay(&self) -> bool {
        matches!(self, Self::EntryExists { .. } | Self::EntryNotFound { .. })
    }
}

impl From<iprop_storage::StorageError> for LogError {
    fn from(err: iprop_storage::StorageError) -> Self {
        match err {
            iprop_storage::StorageError::ReadPastEnd { .. } => Self::EndOfLog,
            iprop_storage::StorageError::Locked => Self::Locked,
            other => Self::Storage(other),
        }
    }
}
