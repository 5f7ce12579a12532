//! A log bound to the database it describes.

use super::context::LogContext;
use super::iter::{Direction, IterControl, IterSummary, RecordMeta, Scope};
use super::marker::Marker;
use super::recovery::RecoverMode;
use crate::config::LogConfig;
use crate::database::PrincipalDatabase;
use crate::error::{LogError, LogResult};
use crate::types::{Timestamp, Version};
use iprop_storage::{LockMode, LockRequest};

/// The transaction log of a principal database.
///
/// Opening a writable log brings it to a consistent state: an empty file
/// gets its uber record, an old-format log is upgraded, and unconfirmed
/// records left by a crash are replayed. Every mutation is then logged,
/// synced, replayed and confirmed before it returns.
///
/// # Example
///
/// ```rust
/// use iprop_core::{IpropLog, LogConfig, MemoryDatabase, Principal, SimpleEntry};
///
/// let dir = tempfile::tempdir().unwrap();
/// let config = LogConfig::new().log_file(dir.path().join("log"));
/// let db = MemoryDatabase::new();
///
/// let mut log = IpropLog::open(&config, db.clone()).unwrap();
/// let alice = Principal::new("EXAMPLE.COM", ["alice"]);
/// log.create(&SimpleEntry::new(alice.clone())).unwrap();
///
/// assert_eq!(log.version().as_u32(), 1);
/// assert!(db.contains(&alice));
/// ```
#[derive(Debug)]
pub struct IpropLog<D: PrincipalDatabase> {
    pub(crate) ctx: LogContext,
    pub(crate) db: D,
}

impl<D: PrincipalDatabase> IpropLog<D> {
    /// Opens the log under the exclusive lock, waiting for it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be opened, repaired or replayed.
    pub fn open(config: &LogConfig, db: D) -> LogResult<Self> {
        Self::open_with(config, db, LockRequest::blocking(LockMode::Exclusive))
    }

    /// Opens the log under the exclusive lock, failing with
    /// [`LogError::Locked`] instead of waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the log is locked, or cannot be opened, repaired
    /// or replayed.
    pub fn open_nonblocking(config: &LogConfig, db: D) -> LogResult<Self> {
        Self::open_with(config, db, LockRequest::nonblocking(LockMode::Exclusive))
    }

    /// Opens the log read-only under a shared lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be opened or read.
    pub fn open_shared(config: &LogConfig, db: D) -> LogResult<Self> {
        Self::open_with(config, db, LockRequest::blocking(LockMode::Shared))
    }

    /// Opens an existing log read-only without locking it.
    ///
    /// # Errors
    ///
    /// Returns an error if the log does not exist or cannot be read.
    pub fn open_unlocked(config: &LogConfig, db: D) -> LogResult<Self> {
        Self::open_with(config, db, LockRequest::blocking(LockMode::Unlocked))
    }

    /// Opens the log under `request`.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be opened, repaired or replayed.
    pub fn open_with(config: &LogConfig, db: D, request: LockRequest) -> LogResult<Self> {
        let ctx = LogContext::open(config, request)?;
        Self::with_context(ctx, db)
    }

    /// Binds an already opened context to `db` and runs the startup
    /// sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be repaired or replayed.
    pub fn with_context(ctx: LogContext, db: D) -> LogResult<Self> {
        let mut log = Self { ctx, db };
        log.startup()?;
        Ok(log)
    }

    fn startup(&mut self) -> LogResult<()> {
        if !self.ctx.is_null() && !self.ctx.is_read_only() {
            if self.ctx.size()? == 0 {
                self.ctx.set_version(Version::ZERO);
                self.ctx.write_uber()?;
                tracing::info!(path = ?self.ctx.path(), "initialised empty log");
                return Ok(());
            }
            match self.ctx.read_marker(Marker::Uber) {
                Err(LogError::NeedsUpgrade) => self.upgrade()?,
                Ok(_) | Err(LogError::Corrupt { .. }) => {}
                Err(err) => return Err(err),
            }
            self.recover(RecoverMode::Replay)?;
        }

        match self.ctx.read_marker(Marker::Last) {
            Ok((version, last_time)) => self.ctx.set_confirmed(version, last_time),
            Err(LogError::EndOfLog) => {}
            Err(err) => return Err(err),
        }
        self.ctx.truncate_if_needed()
    }

    fn upgrade(&mut self) -> LogResult<()> {
        tracing::info!(path = ?self.ctx.path(), "upgrading log to the uber record format");
        let budget = self.ctx.max_log_size() / 4;
        match self.ctx.truncate(0, budget) {
            Err(LogError::NothingToKeep) => {
                let (last, _) = self.ctx.read_marker(Marker::Last)?;
                self.ctx.reinit(last)
            }
            other => other,
        }
    }

    /// Version of the last confirmed record.
    #[must_use]
    pub fn version(&self) -> Version {
        self.ctx.version()
    }

    /// Timestamp of the last confirmed record.
    #[must_use]
    pub fn last_time(&self) -> Timestamp {
        self.ctx.last_time()
    }

    /// Overrides the in-memory version. The file is not touched.
    pub fn set_version(&mut self, version: Version) {
        self.ctx.set_version(version);
    }

    /// Reads one of the log's version markers.
    ///
    /// # Errors
    ///
    /// See [`LogContext::read_marker`].
    pub fn read_marker(&mut self, which: Marker) -> LogResult<(Version, Timestamp)> {
        self.ctx.read_marker(which)
    }

    /// Walks the log. See [`LogContext::for_each`].
    ///
    /// # Errors
    ///
    /// See [`LogContext::for_each`].
    pub fn for_each<F>(&mut self, direction: Direction, scope: Scope, f: F) -> LogResult<IterSummary>
    where
        F: FnMut(&mut LogContext, &RecordMeta) -> LogResult<IterControl>,
    {
        self.ctx.for_each(direction, scope, f)
    }

    /// Keeps only the newest confirmed records. See [`LogContext::truncate`].
    ///
    /// # Errors
    ///
    /// See [`LogContext::truncate`].
    pub fn truncate(&mut self, keep: usize, max_bytes: u64) -> LogResult<()> {
        self.ctx.truncate(keep, max_bytes)
    }

    /// Empties the log and restarts it at nominal version `version`.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::ReadOnly`] without the exclusive lock.
    pub fn reinit(&mut self, version: Version) -> LogResult<()> {
        self.ctx.reinit(version)
    }

    /// The underlying log context.
    #[must_use]
    pub fn context(&self) -> &LogContext {
        &self.ctx
    }

    /// The underlying log context, mutably.
    pub fn context_mut(&mut self) -> &mut LogContext {
        &mut self.ctx
    }

    /// The database.
    #[must_use]
    pub fn database(&self) -> &D {
        &self.db
    }

    /// The database, mutably.
    pub fn database_mut(&mut self) -> &mut D {
        &mut self.db
    }

    /// Releases the lock and returns the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be released.
    pub fn close(mut self) -> LogResult<D> {
        self.ctx.close()?;
        Ok(self.db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{ModifyMask, StoreFlags};
    use crate::log::record::{encode_record, NopKind, OpCode, Operation};
    use crate::log::LOG_UBER_SZ;
    use crate::memory::{Applied, MemoryDatabase, SimpleEntry};
    use crate::principal::Principal;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LogConfig) {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig::new().log_file(dir.path().join("log"));
        (dir, config)
    }

    fn p(name: &str) -> Principal {
        Principal::new("EXAMPLE.COM", [name])
    }

    fn versions(log: &mut IpropLog<MemoryDatabase>, scope: Scope) -> Vec<u32> {
        let mut seen = Vec::new();
        log.for_each(Direction::Forward, scope, |_, meta| {
            if !meta.is_uber() {
                seen.push(meta.version().as_u32());
            }
            Ok(IterControl::Continue)
        })
        .unwrap();
        seen
    }

    /// A database that refuses every real store while `fail` is set.
    #[derive(Debug, Clone, Default)]
    struct Flaky {
        inner: MemoryDatabase,
        fail: bool,
    }

    impl PrincipalDatabase for Flaky {
        type Entry = SimpleEntry;

        fn store(&mut self, entry: &SimpleEntry, flags: StoreFlags) -> LogResult<()> {
            if self.fail && !flags.precheck {
                return Err(LogError::database("disk full"));
            }
            self.inner.store(entry, flags)
        }

        fn remove(&mut self, principal: &Principal, flags: StoreFlags) -> LogResult<()> {
            self.inner.remove(principal, flags)
        }

        fn fetch(&mut self, principal: &Principal) -> LogResult<SimpleEntry> {
            self.inner.fetch(principal)
        }
    }

    #[test]
    fn open_initialises_empty_log() {
        let (_dir, config) = setup();
        let mut log = IpropLog::open(&config, MemoryDatabase::new()).unwrap();

        assert_eq!(log.version(), Version::ZERO);
        assert_eq!(log.context().size().unwrap(), LOG_UBER_SZ);
        assert_eq!(log.read_marker(Marker::Uber).unwrap().0, Version::ZERO);
        assert!(log.read_marker(Marker::First).unwrap_err().is_end_of_log());
    }

    #[test]
    fn mutations_get_consecutive_versions() {
        let (_dir, config) = setup();
        let db = MemoryDatabase::new();
        let mut log = IpropLog::open(&config, db.clone()).unwrap();

        log.create(&SimpleEntry::new(p("alice"))).unwrap();
        log.modify(&SimpleEntry::new(p("alice")).with_kvno(2), ModifyMask::KVNO).unwrap();
        log.rename(&p("alice"), &SimpleEntry::new(p("bob")).with_kvno(2)).unwrap();
        log.delete(&p("bob")).unwrap();

        assert_eq!(log.version(), Version::new(4));
        assert_eq!(versions(&mut log, Scope::All), vec![1, 2, 3, 4]);
        assert!(versions(&mut log, Scope::UnconfirmedOnly).is_empty());
        assert!(db.is_empty());
        assert_eq!(
            db.applied(),
            vec![
                Applied::Stored(p("alice")),
                Applied::Stored(p("alice")),
                Applied::Stored(p("bob")),
                Applied::Removed(p("alice")),
                Applied::Removed(p("bob")),
            ]
        );
    }

    #[test]
    fn modify_merges_into_stored_entry() {
        let (_dir, config) = setup();
        let db = MemoryDatabase::new();
        let mut log = IpropLog::open(&config, db.clone()).unwrap();

        log.create(&SimpleEntry::new(p("alice")).with_max_life(100)).unwrap();
        log.modify(&SimpleEntry::new(p("alice")).with_kvno(5).with_max_life(1), ModifyMask::KVNO)
            .unwrap();

        let stored = db.get(&p("alice")).unwrap();
        assert_eq!(stored.kvno, 5);
        assert_eq!(stored.max_life, Some(100));
    }

    #[test]
    fn failed_precheck_logs_nothing() {
        let (_dir, config) = setup();
        let mut log = IpropLog::open(&config, MemoryDatabase::new()).unwrap();
        log.create(&SimpleEntry::new(p("alice"))).unwrap();

        assert!(matches!(
            log.create(&SimpleEntry::new(p("alice"))),
            Err(LogError::EntryExists { .. })
        ));
        assert!(matches!(log.delete(&p("carol")), Err(LogError::EntryNotFound { .. })));
        assert!(matches!(
            log.modify(&SimpleEntry::new(p("carol")), ModifyMask::KVNO),
            Err(LogError::EntryNotFound { .. })
        ));
        assert!(matches!(
            log.rename(&p("carol"), &SimpleEntry::new(p("dave"))),
            Err(LogError::EntryNotFound { .. })
        ));
        assert_eq!(log.version(), Version::new(1));
        assert_eq!(versions(&mut log, Scope::All), vec![1]);
    }

    #[test]
    fn reopen_restores_version() {
        let (_dir, config) = setup();
        {
            let mut log = IpropLog::open(&config, MemoryDatabase::new()).unwrap();
            log.create(&SimpleEntry::new(p("alice"))).unwrap();
            log.create(&SimpleEntry::new(p("bob"))).unwrap();
        }
        let db = MemoryDatabase::new();
        let mut log = IpropLog::open(&config, db.clone()).unwrap();
        assert_eq!(log.version(), Version::new(2));
        assert!(db.applied().is_empty());

        log.create(&SimpleEntry::new(p("carol"))).unwrap();
        assert_eq!(log.version(), Version::new(3));
    }

    #[test]
    fn unconfirmed_record_is_replayed_on_open() {
        let (_dir, config) = setup();
        {
            let mut log = IpropLog::open(&config, MemoryDatabase::new()).unwrap();
            log.create(&SimpleEntry::new(p("alice"))).unwrap();
            // Written and synced, then "crash" before replay.
            let payload = Operation::Create {
                entry: SimpleEntry::new(p("bob")),
            }
            .encode_payload()
            .unwrap();
            let record =
                encode_record(Version::new(2), Timestamp::new(5), OpCode::Create, &payload).unwrap();
            let ctx = log.context_mut();
            let end = ctx.size().unwrap();
            ctx.seek(end);
            ctx.flush(&record).unwrap();
        }

        let db = MemoryDatabase::new();
        let mut log = IpropLog::open(&config, db.clone()).unwrap();
        assert_eq!(log.version(), Version::new(2));
        assert_eq!(log.last_time(), Timestamp::new(5));
        assert_eq!(db.applied(), vec![Applied::Stored(p("bob"))]);
        assert!(versions(&mut log, Scope::UnconfirmedOnly).is_empty());
    }

    #[test]
    fn failed_commit_leaves_record_for_replay() {
        let (_dir, config) = setup();
        {
            let flaky = Flaky {
                fail: true,
                ..Flaky::default()
            };
            let mut log = IpropLog::open(&config, flaky).unwrap();
            let err = log.create(&SimpleEntry::new(p("alice"))).unwrap_err();
            assert!(matches!(err, LogError::Database { .. }));
        }

        let db = MemoryDatabase::new();
        let mut log = IpropLog::open(&config, db.clone()).unwrap();
        assert_eq!(db.applied(), vec![Applied::Stored(p("alice"))]);
        assert_eq!(log.version(), Version::new(1));
        assert!(versions(&mut log, Scope::UnconfirmedOnly).is_empty());
    }

    #[test]
    fn replay_tolerates_changes_already_applied() {
        let (_dir, config) = setup();
        let db = MemoryDatabase::new();
        {
            let mut log = IpropLog::open(&config, db.clone()).unwrap();
            log.create(&SimpleEntry::new(p("alice"))).unwrap();
            let payload = Operation::<SimpleEntry>::Delete { principal: p("ghost") }
                .encode_payload()
                .unwrap();
            let record =
                encode_record(Version::new(2), Timestamp::new(5), OpCode::Delete, &payload).unwrap();
            let ctx = log.context_mut();
            let end = ctx.size().unwrap();
            ctx.seek(end);
            ctx.flush(&record).unwrap();
        }

        let mut log = IpropLog::open(&config, db).unwrap();
        assert_eq!(log.version(), Version::new(2));
        assert!(versions(&mut log, Scope::UnconfirmedOnly).is_empty());
    }

    #[test]
    fn shared_directory_confirms_without_applying() {
        let (_dir, config) = setup();
        {
            let mut log = IpropLog::open(&config, MemoryDatabase::new()).unwrap();
            let payload = Operation::Create {
                entry: SimpleEntry::new(p("alice")),
            }
            .encode_payload()
            .unwrap();
            let record =
                encode_record(Version::new(1), Timestamp::new(5), OpCode::Create, &payload).unwrap();
            let ctx = log.context_mut();
            let end = ctx.size().unwrap();
            ctx.seek(end);
            ctx.flush(&record).unwrap();
        }

        let db = MemoryDatabase::new().shared_directory(true);
        let mut log = IpropLog::open(&config, db.clone()).unwrap();
        assert!(db.applied().is_empty());
        assert_eq!(log.version(), Version::new(1));
        assert!(versions(&mut log, Scope::UnconfirmedOnly).is_empty());
    }

    #[test]
    fn null_log_applies_directly() {
        let db = MemoryDatabase::new();
        let mut log = IpropLog::open(&LogConfig::new().null_log(), db.clone()).unwrap();

        log.create(&SimpleEntry::new(p("alice"))).unwrap();
        log.rename(&p("alice"), &SimpleEntry::new(p("bob"))).unwrap();
        log.modify(&SimpleEntry::new(p("bob")).with_kvno(4), ModifyMask::KVNO).unwrap();
        log.nop(NopKind::Plain).unwrap();

        assert_eq!(db.principals(), vec![p("bob")]);
        assert_eq!(db.get(&p("bob")).unwrap().kvno, 4);
        assert_eq!(log.version(), Version::ZERO);
        assert_eq!(log.read_marker(Marker::Last).unwrap().0, Version::ZERO);
        assert!(versions(&mut log, Scope::All).is_empty());
    }

    #[test]
    fn shared_open_is_read_only() {
        let (_dir, config) = setup();
        IpropLog::open(&config, MemoryDatabase::new()).unwrap();

        let mut log = IpropLog::open_shared(&config, MemoryDatabase::new()).unwrap();
        assert!(log.context().is_read_only());
        assert!(matches!(
            log.create(&SimpleEntry::new(p("alice"))),
            Err(LogError::ReadOnly)
        ));
        assert!(matches!(log.nop(NopKind::Plain), Err(LogError::ReadOnly)));
        assert!(matches!(log.truncate(1, 0), Err(LogError::ReadOnly)));
    }

    #[test]
    fn nonblocking_open_reports_lock() {
        let (_dir, config) = setup();
        let _holder = IpropLog::open(&config, MemoryDatabase::new()).unwrap();
        let err = IpropLog::open_nonblocking(&config, MemoryDatabase::new()).unwrap_err();
        assert!(matches!(err, LogError::Locked));
    }

    #[test]
    fn nop_kinds_are_logged() {
        let (_dir, config) = setup();
        let mut log = IpropLog::open(&config, MemoryDatabase::new()).unwrap();
        log.nop(NopKind::Plain).unwrap();
        log.nop(NopKind::Close).unwrap();

        let mut lens = Vec::new();
        log.for_each(Direction::Forward, Scope::All, |_, meta| {
            lens.push((meta.version().as_u32(), meta.op(), meta.len()));
            Ok(IterControl::Continue)
        })
        .unwrap();
        assert_eq!(
            lens,
            vec![(0, OpCode::Nop, 16), (1, OpCode::Nop, 0), (2, OpCode::Nop, 4)]
        );
    }

    #[test]
    fn nop_on_empty_log_writes_uber_first() {
        let backend = iprop_storage::InMemoryBackend::new();
        let ctx = LogContext::with_backend(
            Box::new(backend),
            Box::new(crate::signal::NullNotifier),
            0,
        );
        let mut log = IpropLog { ctx, db: MemoryDatabase::new() };

        log.nop(NopKind::Truncate).unwrap();
        assert_eq!(log.version(), Version::new(1));
        assert_eq!(log.context().size().unwrap(), LOG_UBER_SZ + 28);
    }

    #[test]
    fn open_truncates_oversized_log() {
        let (_dir, config) = setup();
        let config = config.max_log_size(400);
        {
            let mut log = IpropLog::open(&config.clone().max_log_size(0), MemoryDatabase::new()).unwrap();
            for _ in 0..20 {
                log.nop(NopKind::Plain).unwrap();
            }
            assert_eq!(log.context().size().unwrap(), LOG_UBER_SZ + 20 * 24);
        }

        let mut log = IpropLog::open(&config, MemoryDatabase::new()).unwrap();
        assert!(log.context().size().unwrap() <= 400);
        assert_eq!(log.version(), Version::new(20));
        assert_eq!(log.read_marker(Marker::First).unwrap().0, Version::new(17));
    }

    #[test]
    fn old_format_log_is_upgraded() {
        let (dir, config) = setup();
        let mut old = Vec::new();
        for v in 5..=7 {
            old.extend(encode_record(Version::new(v), Timestamp::new(v), OpCode::Nop, b"").unwrap());
        }
        std::fs::write(dir.path().join("log"), &old).unwrap();

        let mut log = IpropLog::open(&config, MemoryDatabase::new()).unwrap();
        assert_eq!(log.read_marker(Marker::Uber).unwrap().0, Version::ZERO);
        assert_eq!(log.read_marker(Marker::First).unwrap().0, Version::new(5));
        assert_eq!(log.version(), Version::new(7));

        log.nop(NopKind::Plain).unwrap();
        assert_eq!(log.version(), Version::new(8));
    }

    #[test]
    fn garbage_log_is_reinitialised() {
        let (dir, config) = setup();
        std::fs::write(dir.path().join("log"), b"not a log at all, clearly").unwrap();

        let mut log = IpropLog::open(&config, MemoryDatabase::new()).unwrap();
        assert_eq!(log.version(), Version::ZERO);
        assert_eq!(log.context().size().unwrap(), LOG_UBER_SZ);
        log.create(&SimpleEntry::new(p("alice"))).unwrap();
        assert_eq!(log.version(), Version::new(1));
    }

    #[test]
    fn reinit_starts_new_sequence() {
        let (_dir, config) = setup();
        let mut log = IpropLog::open(&config, MemoryDatabase::new()).unwrap();
        log.create(&SimpleEntry::new(p("alice"))).unwrap();

        log.reinit(Version::new(50)).unwrap();
        assert_eq!(log.read_marker(Marker::Last).unwrap().0, Version::new(50));
        log.create(&SimpleEntry::new(p("bob"))).unwrap();
        assert_eq!(log.version(), Version::new(51));
    }

    #[test]
    fn shipped_records_are_replayed() {
        let (_dir, master_config) = setup();
        let (_replica_dir, replica_config) = setup();

        let mut master = IpropLog::open(&master_config, MemoryDatabase::new()).unwrap();
        master.create(&SimpleEntry::new(p("alice"))).unwrap();
        master.create(&SimpleEntry::new(p("bob"))).unwrap();

        let mut batch = Vec::new();
        master
            .for_each(Direction::Forward, Scope::ConfirmedOnly, |ctx, meta| {
                if !meta.is_uber() {
                    batch.extend(ctx.read_record(meta)?);
                }
                Ok(IterControl::Continue)
            })
            .unwrap();

        let replica_db = MemoryDatabase::new();
        let mut replica = IpropLog::open(&replica_config, replica_db.clone()).unwrap();
        assert_eq!(replica.append_shipped(&batch).unwrap(), 2);
        assert_eq!(replica.version(), Version::new(2));
        assert_eq!(replica_db.principals(), vec![p("alice"), p("bob")]);

        assert!(replica.append_shipped(&batch).unwrap_err().is_corrupt());
        assert_eq!(replica.version(), Version::new(2));
    }

    #[test]
    fn close_releases_lock() {
        let (_dir, config) = setup();
        let log = IpropLog::open(&config, MemoryDatabase::new()).unwrap();
        let _db = log.close().unwrap();
        IpropLog::open_nonblocking(&config, MemoryDatabase::new()).unwrap();
    }
}
