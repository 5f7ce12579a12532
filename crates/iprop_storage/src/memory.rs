//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::lock::LockMode;
use parking_lot::RwLock;

/// An in-memory storage backend.
///
/// Suitable for unit tests and for the engine's own scratch work. It can
/// pretend to hold any [`LockMode`], which lets tests exercise the
/// read-only paths without a second process.
///
/// # Example
///
/// ```rust
/// use iprop_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let offset = backend.append(b"test data").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.size().unwrap(), 9);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
    lock: LockMode,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend holding the exclusive lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory backend with pre-existing data.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
            lock: LockMode::Exclusive,
        }
    }

    /// Reports `lock` as the lock this backend holds.
    #[must_use]
    pub fn with_lock_mode(mut self, lock: LockMode) -> Self {
        self.lock = lock;
        self
    }

    /// Returns a copy of all data in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn write_at(&mut self, offset: u64, new_data: &[u8]) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if offset > size {
            return Err(StorageError::WritePastEnd { offset, size });
        }
        let start = offset as usize;
        let end = start + new_data.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(new_data);
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let current_size = data.len() as u64;

        if new_size > current_size {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate to size {} which is greater than current size {}",
                    new_size, current_size
                ),
            )));
        }

        data.truncate(new_size as usize);
        Ok(())
    }

    fn lock_mode(&self) -> LockMode {
        self.lock
    }

    fn unlock(&mut self) -> StorageResult<()> {
        self.lock = LockMode::Unlocked;
        Ok(())
    }
}
