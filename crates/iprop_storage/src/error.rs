//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// A positional write would leave a gap after the current end.
    #[error("write beyond end of storage: offset {offset}, size {size}")]
    WritePastEnd {
        /// The requested write offset.
        offset: u64,
        /// The current storage size.
        size: u64,
    },

    /// A non-blocking lock request found the file locked by someone else.
    #[error("file is locked by another process")]
    Locked,

    /// The storage is closed.
    #[error("storage is closed")]
    Closed,
}

impl StorageError {
    /// Returns true if this error reports a read past the end of storage.
    #[must_use]
    pub fn is_read_past_end(&self) -> bool {
        matches!(self, Self::ReadPastEnd { .. })
    }
}
