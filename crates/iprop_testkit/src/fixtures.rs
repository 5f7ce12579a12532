//! Test fixtures and log helpers.
//!
//! Provides a log file in a temporary directory, opened in the various
//! lock modes, plus small helpers for building entries and inspecting
//! what a log holds.

use crate::crash::{CrashControl, CrashableBackend};
use iprop_core::log::record::encode_record;
use iprop_core::{
    Direction, IpropLog, IterControl, LockMode, LockRequest, LogConfig, LogContext, LogResult,
    MemoryDatabase, NullNotifier, OpCode, Operation, Principal, PrincipalDatabase, Scope,
    SimpleEntry, Timestamp, Version,
};
use iprop_storage::FileBackend;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;

/// Realm used by every helper in this crate.
pub const TEST_REALM: &str = "EXAMPLE.COM";

/// A log file in a temporary directory, with a database that outlives
/// individual log sessions.
#[derive(Debug)]
pub struct TestLog {
    config: LogConfig,
    db: MemoryDatabase,
    _temp_dir: TempDir,
}

impl Default for TestLog {
    fn default() -> Self {
        Self::new()
    }
}

impl TestLog {
    /// Creates a fixture with an empty directory and an empty database.
    ///
    /// Automatic truncation is off so tests control the log's size.
    #[must_use]
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = LogConfig::for_database_dir(temp_dir.path()).max_log_size(0);
        Self {
            config,
            db: MemoryDatabase::new(),
            _temp_dir: temp_dir,
        }
    }

    /// Sets the maximum log size used by later opens.
    #[must_use]
    pub fn with_max_log_size(mut self, size: u64) -> Self {
        self.config = self.config.max_log_size(size);
        self
    }

    /// The log configuration.
    #[must_use]
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self._temp_dir.path().join(iprop_core::LOG_FILE_NAME)
    }

    /// The fixture's database. Clones share state with it.
    #[must_use]
    pub fn db(&self) -> &MemoryDatabase {
        &self.db
    }

    /// Opens the log exclusively over the fixture's database.
    #[must_use]
    pub fn open(&self) -> IpropLog<MemoryDatabase> {
        IpropLog::open(&self.config, self.db.clone()).expect("Failed to open log")
    }

    /// Opens the log exclusively over `db`.
    ///
    /// # Errors
    ///
    /// Returns any error from opening or recovering the log.
    pub fn open_with<D: PrincipalDatabase>(&self, db: D) -> LogResult<IpropLog<D>> {
        IpropLog::open(&self.config, db)
    }

    /// Opens the log with a shared lock over a fresh database.
    #[must_use]
    pub fn open_shared(&self) -> IpropLog<MemoryDatabase> {
        IpropLog::open_shared(&self.config, MemoryDatabase::new()).expect("Failed to open log")
    }

    /// Opens a bare context on the log file.
    ///
    /// # Errors
    ///
    /// Returns any error from opening or locking the file.
    pub fn context(&self, mode: LockMode) -> LogResult<LogContext> {
        LogContext::open(&self.config, LockRequest::blocking(mode))
    }

    /// Opens the log exclusively through a [`CrashableBackend`].
    ///
    /// # Errors
    ///
    /// Returns any error from opening or recovering the log.
    pub fn open_crashable<D: PrincipalDatabase>(
        &self,
        db: D,
        control: &CrashControl,
    ) -> LogResult<IpropLog<D>> {
        let file = FileBackend::open(&self.path(), LockRequest::blocking(LockMode::Exclusive))?;
        let backend = CrashableBackend::new(Box::new(file), control.clone());
        let ctx = LogContext::with_backend(
            Box::new(backend),
            Box::new(NullNotifier),
            self.config.max_log_size,
        );
        IpropLog::with_context(ctx, db)
    }

    /// Raw bytes of the log file.
    #[must_use]
    pub fn bytes(&self) -> Vec<u8> {
        std::fs::read(self.path()).expect("Failed to read log file")
    }

    /// Replaces the log file's contents.
    pub fn write_bytes(&self, bytes: &[u8]) {
        std::fs::write(self.path(), bytes).expect("Failed to write log file");
    }

    /// Appends raw bytes to the log file, behind the log's back.
    pub fn append_bytes(&self, bytes: &[u8]) {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.path())
            .expect("Failed to open log file");
        file.write_all(bytes).expect("Failed to append to log file");
    }

    /// Appends a well-formed record without confirming it, as if the
    /// writer crashed between syncing the record and replaying it.
    pub fn append_unconfirmed(&self, version: u32, op: &Operation<SimpleEntry>) {
        let payload = op.encode_payload().expect("Failed to encode payload");
        let record = encode_record(Version::new(version), Timestamp::now(), op.op_code(), &payload)
            .expect("Failed to frame record");
        self.append_bytes(&record);
    }
}

/// A single-component principal in [`TEST_REALM`].
#[must_use]
pub fn principal(name: &str) -> Principal {
    Principal::new(TEST_REALM, [name])
}

/// A fresh entry for `name`.
#[must_use]
pub fn entry(name: &str) -> SimpleEntry {
    SimpleEntry::new(principal(name))
}

/// A create record for `name`.
#[must_use]
pub fn create_op(name: &str) -> Operation<SimpleEntry> {
    Operation::Create { entry: entry(name) }
}

/// Versions of the records in `scope`, oldest first, without the uber
/// record.
///
/// # Errors
///
/// Returns any error from walking the log.
pub fn record_versions(ctx: &mut LogContext, scope: Scope) -> LogResult<Vec<u32>> {
    let mut versions = Vec::new();
    ctx.for_each(Direction::Forward, scope, |_, meta| {
        if !meta.is_uber() {
            versions.push(meta.version().as_u32());
        }
        Ok(IterControl::Continue)
    })?;
    Ok(versions)
}

/// Opcodes of every record after the uber record, oldest first.
///
/// # Errors
///
/// Returns any error from walking the log.
pub fn record_ops(ctx: &mut LogContext) -> LogResult<Vec<OpCode>> {
    let mut ops = Vec::new();
    ctx.for_each(Direction::Forward, Scope::All, |_, meta| {
        if !meta.is_uber() {
            ops.push(meta.op());
        }
        Ok(IterControl::Continue)
    })?;
    Ok(ops)
}

/// Every confirmed record after the uber record, framed and concatenated
/// the way a master ships them.
///
/// # Errors
///
/// Returns any error from walking the log.
pub fn confirmed_records(ctx: &mut LogContext) -> LogResult<Vec<u8>> {
    let mut batch = Vec::new();
    ctx.for_each(Direction::Forward, Scope::ConfirmedOnly, |ctx, meta| {
        if !meta.is_uber() {
            batch.extend(ctx.read_record(meta)?);
        }
        Ok(IterControl::Continue)
    })?;
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_opens_empty_log() {
        let fixture = TestLog::new();
        let log = fixture.open();
        assert_eq!(log.version(), Version::ZERO);
        drop(log);
        assert_eq!(fixture.bytes().len() as u64, iprop_core::LOG_UBER_SZ);
    }

    #[test]
    fn unconfirmed_records_are_visible() {
        let fixture = TestLog::new();
        drop(fixture.open());
        fixture.append_unconfirmed(1, &create_op("alice"));

        let mut ctx = fixture.context(LockMode::Shared).unwrap();
        assert!(record_versions(&mut ctx, Scope::ConfirmedOnly).unwrap().is_empty());
        assert_eq!(record_versions(&mut ctx, Scope::UnconfirmedOnly).unwrap(), vec![1]);
        assert_eq!(record_ops(&mut ctx).unwrap(), vec![OpCode::Create]);
    }
}
