//! File-based storage backend guarded by an advisory whole-file lock.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::lock::{LockMode, LockRequest};
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-based storage backend.
///
/// The file is locked for the lifetime of the backend (or until
/// [`StorageBackend::unlock`]). The size is always taken from the file
/// metadata, so a reader holding a shared lock sees records appended by a
/// writer between its sessions.
///
/// # Durability
///
/// - `flush()` calls `File::flush()` to push data to the OS
/// - `sync()` calls `File::sync_all()` to ensure data is on disk
///
/// # Example
///
/// ```no_run
/// use iprop_storage::{FileBackend, LockMode, StorageBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("log"), LockMode::Exclusive.into()).unwrap();
/// backend.append(b"record").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    lock: LockMode,
}

impl FileBackend {
    /// Opens the file at `path` and takes the requested lock.
    ///
    /// Any locked mode creates the file if it is missing; an unlocked open
    /// requires it to exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if a non-blocking request meets
    /// contention, or an I/O error if the file cannot be opened or locked.
    pub fn open(path: &Path, request: LockRequest) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(request.mode.creates_file())
            .truncate(false)
            .open(path)?;

        acquire(&file, request)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            lock: request.mode,
        })
    }

    /// Opens the file, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot
    /// be opened or locked.
    pub fn open_with_create_dirs(path: &Path, request: LockRequest) -> StorageResult<Self> {
        if request.mode.creates_file() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::open(path, request)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn acquire(file: &File, request: LockRequest) -> StorageResult<()> {
    let result = match (request.mode, request.nonblocking) {
        (LockMode::Unlocked, _) => return Ok(()),
        (LockMode::Shared, false) => FileExt::lock_shared(file),
        (LockMode::Shared, true) => FileExt::try_lock_shared(file),
        (LockMode::Exclusive, false) => FileExt::lock_exclusive(file),
        (LockMode::Exclusive, true) => FileExt::try_lock_exclusive(file),
    };
    result.map_err(|err| {
        if request.nonblocking && err.kind() == fs2::lock_contended_error().kind() {
            StorageError::Locked
        } else {
            StorageError::Io(err)
        }
    })
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut file = self.file.write();
        let size = file.metadata()?.len();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut file = self.file.write();
        let offset = file.seek(SeekFrom::End(0))?;
        if !data.is_empty() {
            file.write_all(data)?;
        }
        Ok(offset)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let mut file = self.file.write();
        let size = file.metadata()?.len();
        if offset > size {
            return Err(StorageError::WritePastEnd { offset, size });
        }
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.write().flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.file.read().metadata()?.len())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let file = self.file.write();
        let size = file.metadata()?.len();

        if new_size > size {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate to size {} which is greater than current size {}",
                    new_size, size
                ),
            )));
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        Ok(())
    }

    fn lock_mode(&self) -> LockMode {
        self.lock
    }

    fn unlock(&mut self) -> StorageResult<()> {
        if self.lock != LockMode::Unlocked {
            FileExt::unlock(&*self.file.read())?;
            self.lock = LockMode::Unlocked;
        }
        Ok(())
    }
}
