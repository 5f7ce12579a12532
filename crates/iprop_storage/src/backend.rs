//! Storage backend trait definition.

use crate::error::StorageResult;
use crate::lock::LockMode;

/// A byte store holding one transaction log.
///
/// Storage backends are **opaque byte stores**. The log engine owns all
/// format interpretation: backends do not understand records, versions or
/// the uber record.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `write_at` never extends the store past its current size plus the
///   data length, and never leaves a gap
/// - `sync` makes all previous writes durable
/// - Backends must be `Send + Sync`
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For on-disk logs
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the read would extend
    /// beyond the current size, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the storage.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Overwrites bytes in place starting at `offset`.
    ///
    /// Used for the log's one mutable region (the uber record payload).
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::WritePastEnd`] if `offset` is beyond
    /// the current size, or an I/O error.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the storage to the given size.
    ///
    /// # Errors
    ///
    /// Returns an error if the truncation fails or `new_size` is greater
    /// than the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Returns the advisory lock held on the underlying store.
    ///
    /// Backends without a lock (in-memory stores) behave as if they held the
    /// exclusive lock.
    fn lock_mode(&self) -> LockMode {
        LockMode::Exclusive
    }

    /// Releases the advisory lock, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be released.
    fn unlock(&mut self) -> StorageResult<()> {
        Ok(())
    }
}
