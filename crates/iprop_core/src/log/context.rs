//! The open log: backend, cursor and in-memory confirmed state.

use super::record::{RecordHeader, RecordTrailer};
use super::{LOG_HEADER_SZ, LOG_TRAILER_SZ};
use crate::config::{effective_max_log_size, LogConfig, LogTarget};
use crate::error::{LogError, LogResult};
use crate::signal::{notifier_from_config, NullNotifier, ReplicationNotifier};
use crate::types::{Timestamp, Version};
use iprop_storage::{FileBackend, LockMode, LockRequest, StorageBackend};
use std::fmt;
use std::path::{Path, PathBuf};

/// An open log without a database attached.
///
/// Holds the storage backend (or none, for the null sink), the cursor used
/// by every positional operation, the lock the log was opened under, and
/// the version and timestamp of the last confirmed record. The replication
/// notifier is owned here too, so every marker update can announce itself.
///
/// Tools that only read or truncate the log use `LogContext` directly;
/// servers wrap it in [`super::IpropLog`].
pub struct LogContext {
    backend: Option<Box<dyn StorageBackend>>,
    null: bool,
    path: Option<PathBuf>,
    pos: u64,
    lock: LockMode,
    version: Version,
    last_time: Timestamp,
    max_log_size: u64,
    notifier: Box<dyn ReplicationNotifier>,
}

impl fmt::Debug for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogContext")
            .field("path", &self.path)
            .field("null", &self.null)
            .field("pos", &self.pos)
            .field("lock", &self.lock)
            .field("version", &self.version)
            .field("last_time", &self.last_time)
            .field("max_log_size", &self.max_log_size)
            .field("notifier", &self.notifier)
            .finish()
    }
}

impl LogContext {
    /// Opens the log named by `config` under `request`.
    ///
    /// No records are read; see [`super::IpropLog::open`] for the full
    /// startup sequence.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Locked`] if a non-blocking request meets
    /// contention, or an I/O error if the file cannot be opened.
    pub fn open(config: &LogConfig, request: LockRequest) -> LogResult<Self> {
        let notifier = notifier_from_config(&config.signal);
        match &config.log_file {
            LogTarget::Null => Ok(Self::null(notifier)),
            LogTarget::File(path) => {
                let backend = FileBackend::open(path, request)?;
                let mut ctx = Self::with_backend(Box::new(backend), notifier, config.max_log_size);
                ctx.path = Some(path.clone());
                Ok(ctx)
            }
        }
    }

    /// Wraps an already opened backend.
    ///
    /// The lock mode is taken from the backend.
    #[must_use]
    pub fn with_backend(
        backend: Box<dyn StorageBackend>,
        notifier: Box<dyn ReplicationNotifier>,
        max_log_size: u64,
    ) -> Self {
        let lock = backend.lock_mode();
        Self {
            backend: Some(backend),
            null: false,
            path: None,
            pos: 0,
            lock,
            version: Version::ZERO,
            last_time: Timestamp::default(),
            max_log_size: effective_max_log_size(max_log_size),
            notifier,
        }
    }

    /// A null-sink log: reads see an empty log and writes are no-ops.
    #[must_use]
    pub fn null(notifier: Box<dyn ReplicationNotifier>) -> Self {
        Self {
            backend: None,
            null: true,
            path: None,
            pos: 0,
            lock: LockMode::Exclusive,
            version: Version::ZERO,
            last_time: Timestamp::default(),
            max_log_size: 0,
            notifier,
        }
    }

    /// Releases the lock and the backend. Later operations behave as on a
    /// closed, read-only log.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be released.
    pub fn close(&mut self) -> LogResult<()> {
        if let Some(mut backend) = self.backend.take() {
            backend.unlock()?;
        }
        self.lock = LockMode::Unlocked;
        self.pos = 0;
        Ok(())
    }

    /// Version of the last confirmed record.
    #[must_use]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Overrides the in-memory version. The file is not touched.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Timestamp of the last confirmed record.
    #[must_use]
    pub const fn last_time(&self) -> Timestamp {
        self.last_time
    }

    /// The lock the log was opened under.
    #[must_use]
    pub const fn lock_mode(&self) -> LockMode {
        self.lock
    }

    /// True unless the exclusive lock is held.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.lock.is_read_only()
    }

    /// True for the null sink.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.null
    }

    /// Path of the log file, if it has one.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current cursor offset.
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.pos
    }

    /// Maximum log size enforced on open (0 = unlimited).
    #[must_use]
    pub const fn max_log_size(&self) -> u64 {
        self.max_log_size
    }

    /// Moves the cursor.
    pub fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    /// Current file size.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    pub fn size(&self) -> LogResult<u64> {
        match &self.backend {
            Some(backend) => Ok(backend.size()?),
            None => Ok(0),
        }
    }

    pub(crate) fn set_confirmed(&mut self, version: Version, last_time: Timestamp) {
        self.version = version;
        self.last_time = last_time;
    }

    pub(crate) fn notify(&self) {
        self.notifier.notify(self.version);
    }

    pub(crate) fn ensure_writable(&self) -> LogResult<()> {
        if self.is_read_only() {
            return Err(LogError::ReadOnly);
        }
        Ok(())
    }

    pub(crate) fn backend(&self) -> LogResult<&dyn StorageBackend> {
        self.backend.as_deref().ok_or(LogError::Storage(iprop_storage::StorageError::Closed))
    }

    pub(crate) fn backend_mut(&mut self) -> LogResult<&mut (dyn StorageBackend + 'static)> {
        self.backend
            .as_deref_mut()
            .ok_or(LogError::Storage(iprop_storage::StorageError::Closed))
    }

    /// Reads `len` bytes at `offset`; short reads are [`LogError::EndOfLog`].
    pub(crate) fn read_at(&self, offset: u64, len: usize) -> LogResult<Vec<u8>> {
        Ok(self.backend()?.read_at(offset, len)?)
    }

    /// Makes everything written so far durable.
    pub(crate) fn sync(&mut self) -> LogResult<()> {
        if self.backend.is_none() {
            return Ok(());
        }
        let backend = self.backend_mut()?;
        backend.flush()?;
        backend.sync()?;
        Ok(())
    }

    /// Reads the header at the cursor and leaves the cursor on the payload.
    ///
    /// A clean end of file is [`LogError::EndOfLog`]; a partial header is
    /// [`LogError::Corrupt`].
    pub(crate) fn read_header(&mut self) -> LogResult<RecordHeader> {
        let size = self.size()?;
        if self.pos >= size {
            return Err(LogError::EndOfLog);
        }
        if size - self.pos < LOG_HEADER_SZ {
            return Err(LogError::corrupt(format!(
                "partial record header at offset {} ({} bytes before end of log)",
                self.pos,
                size - self.pos
            )));
        }
        let raw = self.read_at(self.pos, LOG_HEADER_SZ as usize)?;
        let header = RecordHeader::decode(&raw).map_err(|err| match err {
            LogError::Corrupt { message } => {
                LogError::corrupt(format!("{message} at offset {}", self.pos))
            }
            other => other,
        })?;
        self.pos += LOG_HEADER_SZ;
        Ok(header)
    }

    /// Reads the header at the cursor without moving it.
    pub(crate) fn peek_header(&mut self) -> LogResult<RecordHeader> {
        let saved = self.pos;
        let result = self.read_header();
        self.pos = saved;
        result
    }

    /// Reads the trailer at `offset`; a short read is [`LogError::Corrupt`].
    pub(crate) fn read_trailer_at(&self, offset: u64) -> LogResult<RecordTrailer> {
        match self.read_at(offset, LOG_TRAILER_SZ as usize) {
            Ok(raw) => RecordTrailer::decode(&raw),
            Err(LogError::EndOfLog) => Err(LogError::corrupt(format!(
                "record trailer at offset {offset} runs past end of log"
            ))),
            Err(err) => Err(err),
        }
    }
}

impl Drop for LogContext {
    fn drop(&mut self) {
        if let Some(backend) = self.backend.as_deref_mut() {
            if let Err(err) = backend.unlock() {
                tracing::debug!(error = %err, "failed to release log lock");
            }
        }
    }
}

impl Default for LogContext {
    fn default() -> Self {
        Self::null(Box::new(NullNotifier))
    }
}
