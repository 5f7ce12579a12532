//! Fault injection for crash-recovery tests.
//!
//! [`CrashableBackend`] wraps a real backend and can tear a write part way
//! through, refuse in-place writes, or refuse to sync. [`FaultyDatabase`]
//! wraps a [`MemoryDatabase`] and fails the next store or remove. Both are
//! driven through cloneable handles so a test keeps control after handing
//! them to the log.
//!
//! ## Usage
//!
//! ```rust
//! use iprop_testkit::prelude::*;
//!
//! let fixture = TestLog::new();
//! let control = CrashControl::new();
//! let mut log = fixture.open_crashable(fixture.db().clone(), &control).unwrap();
//! log.create(&entry("alice")).unwrap();
//!
//! control.crash_after(10);
//! assert!(log.create(&entry("bob")).is_err());
//! assert!(control.has_crashed());
//! ```

use iprop_core::{LogError, LogResult, MemoryDatabase, Principal, PrincipalDatabase, SimpleEntry, StoreFlags};
use iprop_storage::{LockMode, StorageBackend, StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct CrashState {
    crash_after_bytes: AtomicU64,
    bytes_written: AtomicU64,
    crashed: AtomicBool,
    fail_write_at: AtomicBool,
    fail_sync: AtomicBool,
}

/// Shared switches for a [`CrashableBackend`].
#[derive(Debug, Clone)]
pub struct CrashControl {
    state: Arc<CrashState>,
}

impl Default for CrashControl {
    fn default() -> Self {
        Self::new()
    }
}

impl CrashControl {
    /// Creates a control with every fault disarmed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(CrashState {
                crash_after_bytes: AtomicU64::new(u64::MAX),
                bytes_written: AtomicU64::new(0),
                crashed: AtomicBool::new(false),
                fail_write_at: AtomicBool::new(false),
                fail_sync: AtomicBool::new(false),
            }),
        }
    }

    /// Lets `bytes` more appended bytes through, then tears the write that
    /// crosses the limit and fails everything after it.
    pub fn crash_after(&self, bytes: u64) {
        self.state.bytes_written.store(0, Ordering::SeqCst);
        self.state.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Makes in-place writes (the uber record's marker) fail.
    pub fn fail_write_at(&self, fail: bool) {
        self.state.fail_write_at.store(fail, Ordering::SeqCst);
    }

    /// Makes `flush` and `sync` fail.
    pub fn fail_sync(&self, fail: bool) {
        self.state.fail_sync.store(fail, Ordering::SeqCst);
    }

    /// Disarms every fault and forgets a crash.
    pub fn reset(&self) {
        self.state.crash_after_bytes.store(u64::MAX, Ordering::SeqCst);
        self.state.bytes_written.store(0, Ordering::SeqCst);
        self.state.crashed.store(false, Ordering::SeqCst);
        self.state.fail_write_at.store(false, Ordering::SeqCst);
        self.state.fail_sync.store(false, Ordering::SeqCst);
    }

    /// Whether a torn write has happened.
    #[must_use]
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    /// Bytes appended since the last [`CrashControl::crash_after`].
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.state.bytes_written.load(Ordering::SeqCst)
    }

    fn check_alive(&self) -> StorageResult<()> {
        if self.has_crashed() {
            return Err(simulated("backend has crashed"));
        }
        Ok(())
    }
}

fn simulated(what: &str) -> StorageError {
    StorageError::Io(io::Error::other(format!("simulated failure: {what}")))
}

/// A storage backend wrapper that can simulate crashes.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    control: CrashControl,
}

impl CrashableBackend {
    /// Wraps `inner`, driven by `control`.
    #[must_use]
    pub fn new(inner: Box<dyn StorageBackend>, control: CrashControl) -> Self {
        Self { inner, control }
    }
}

impl std::fmt::Debug for CrashableBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashableBackend")
            .field("control", &self.control)
            .finish_non_exhaustive()
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.control.check_alive()?;
        let state = &self.control.state;
        let written = state.bytes_written.load(Ordering::SeqCst);
        let limit = state.crash_after_bytes.load(Ordering::SeqCst);
        let room = limit.saturating_sub(written);

        if data.len() as u64 > room {
            let torn = room as usize;
            if torn > 0 {
                self.inner.append(&data[..torn])?;
            }
            state.bytes_written.fetch_add(room, Ordering::SeqCst);
            state.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("crash during append"));
        }

        let offset = self.inner.append(data)?;
        state
            .bytes_written
            .fetch_add(data.len() as u64, Ordering::SeqCst);
        Ok(offset)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        self.control.check_alive()?;
        if self.control.state.fail_write_at.load(Ordering::SeqCst) {
            return Err(simulated("write_at"));
        }
        self.inner.write_at(offset, data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.control.check_alive()?;
        if self.control.state.fail_sync.load(Ordering::SeqCst) {
            return Err(simulated("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.control.check_alive()?;
        if self.control.state.fail_sync.load(Ordering::SeqCst) {
            return Err(simulated("sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.control.check_alive()?;
        self.inner.truncate(new_size)
    }

    fn lock_mode(&self) -> LockMode {
        self.inner.lock_mode()
    }

    fn unlock(&mut self) -> StorageResult<()> {
        self.inner.unlock()
    }
}

/// A [`MemoryDatabase`] that can be told to fail its next real store or
/// remove. Prechecks always go through.
#[derive(Debug, Clone, Default)]
pub struct FaultyDatabase {
    inner: MemoryDatabase,
    fail_store: Arc<AtomicBool>,
    fail_remove: Arc<AtomicBool>,
}

impl FaultyDatabase {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: MemoryDatabase) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    /// Fails the next store that is not a precheck.
    pub fn fail_next_store(&self) {
        self.fail_store.store(true, Ordering::SeqCst);
    }

    /// Fails the next remove that is not a precheck.
    pub fn fail_next_remove(&self) {
        self.fail_remove.store(true, Ordering::SeqCst);
    }

    /// The wrapped database.
    #[must_use]
    pub fn inner(&self) -> &MemoryDatabase {
        &self.inner
    }
}

impl PrincipalDatabase for FaultyDatabase {
    type Entry = SimpleEntry;

    fn store(&mut self, entry: &SimpleEntry, flags: StoreFlags) -> LogResult<()> {
        if !flags.precheck && self.fail_store.swap(false, Ordering::SeqCst) {
            return Err(LogError::database(format!(
                "simulated store failure for {}",
                entry.principal
            )));
        }
        self.inner.store(entry, flags)
    }

    fn remove(&mut self, principal: &Principal, flags: StoreFlags) -> LogResult<()> {
        if !flags.precheck && self.fail_remove.swap(false, Ordering::SeqCst) {
            return Err(LogError::database(format!(
                "simulated remove failure for {principal}"
            )));
        }
        self.inner.remove(principal, flags)
    }

    fn fetch(&mut self, principal: &Principal) -> LogResult<SimpleEntry> {
        self.inner.fetch(principal)
    }

    fn is_shared_directory(&self) -> bool {
        self.inner.is_shared_directory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iprop_storage::InMemoryBackend;

    #[test]
    fn torn_append_keeps_prefix() {
        let control = CrashControl::new();
        let mut backend = CrashableBackend::new(Box::new(InMemoryBackend::new()), control.clone());
        backend.append(b"hello").unwrap();

        control.crash_after(3);
        assert!(backend.append(b"world").is_err());
        assert!(control.has_crashed());
        assert_eq!(backend.size().unwrap(), 8);
        assert_eq!(backend.read_at(0, 8).unwrap(), b"hellowor");
        assert!(backend.sync().is_err());

        control.reset();
        backend.append(b"!").unwrap();
        assert_eq!(backend.size().unwrap(), 9);
    }

    #[test]
    fn write_at_and_sync_faults() {
        let control = CrashControl::new();
        let mut backend = CrashableBackend::new(Box::new(InMemoryBackend::new()), control.clone());
        backend.append(b"abcd").unwrap();

        control.fail_write_at(true);
        assert!(backend.write_at(0, b"x").is_err());
        control.fail_sync(true);
        assert!(backend.sync().is_err());
        assert!(backend.flush().is_err());
        assert!(!control.has_crashed());

        control.reset();
        backend.write_at(0, b"x").unwrap();
        backend.sync().unwrap();
        assert_eq!(backend.read_at(0, 4).unwrap(), b"xbcd");
    }

    #[test]
    fn faulty_database_fails_once() {
        let mut db = FaultyDatabase::new(MemoryDatabase::new());
        let entry = SimpleEntry::new(Principal::new("EXAMPLE.COM", ["alice"]));

        db.fail_next_store();
        db.store(&entry, StoreFlags::PRECHECK).unwrap();
        assert!(matches!(
            db.store(&entry, StoreFlags::NONE),
            Err(LogError::Database { .. })
        ));
        db.store(&entry, StoreFlags::NONE).unwrap();
        assert!(db.inner().contains(&entry.principal));

        db.fail_next_remove();
        assert!(db.remove(&entry.principal, StoreFlags::NONE).is_err());
        db.remove(&entry.principal, StoreFlags::NONE).unwrap();
        assert!(db.inner().is_empty());
    }
}
