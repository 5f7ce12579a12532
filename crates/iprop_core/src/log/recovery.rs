//! Replaying unconfirmed records into the database.

use super::engine::IpropLog;
use super::iter::{Direction, IterControl, Scope};
use super::record::Operation;
use crate::database::{LogEntry, PrincipalDatabase, StoreFlags};
use crate::error::{LogError, LogResult};

/// Why unconfirmed records are being replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverMode {
    /// Right after appending: exactly one unconfirmed record must exist,
    /// and every database error is fatal.
    Commit,
    /// On open or after receiving shipped records: any number of
    /// unconfirmed records; "already exists" and "not found" are expected
    /// because the database may already reflect some of them.
    Replay,
}

impl<D: PrincipalDatabase> IpropLog<D> {
    /// Replays every unconfirmed record into the database, confirming each
    /// one as it succeeds, and returns how many were confirmed.
    ///
    /// A database shared with the writer is not touched in
    /// [`RecoverMode::Replay`]; the records are only confirmed.
    ///
    /// # Errors
    ///
    /// - [`LogError::Corrupt`] in commit mode unless exactly one record was
    ///   confirmed
    /// - the database error that stopped replay; that record and the ones
    ///   after it stay unconfirmed
    pub fn recover(&mut self, mode: RecoverMode) -> LogResult<usize> {
        if self.ctx.is_null() {
            return Ok(0);
        }
        self.ctx.goto_logical_end()?;

        let apply = !(mode == RecoverMode::Replay && self.db.is_shared_directory());
        let db = &mut self.db;
        let mut count = 0usize;
        self.ctx
            .for_each(Direction::Forward, Scope::UnconfirmedOnly, |ctx, meta| {
                if mode == RecoverMode::Commit && count > 0 {
                    return Err(LogError::corrupt(format!(
                        "found a second unconfirmed record (version {}) while committing",
                        meta.version()
                    )));
                }
                if apply {
                    let payload = ctx.read_payload(meta)?;
                    let op = Operation::<D::Entry>::decode(meta.op(), &payload)?;
                    match replay_operation(db, op) {
                        Ok(()) => {}
                        Err(err) if mode == RecoverMode::Replay && err.is_benign_during_replay() => {
                            tracing::debug!(version = %meta.version(), error = %err, "replay found change already applied");
                        }
                        Err(err) => {
                            tracing::warn!(
                                version = %meta.version(),
                                op = %meta.op(),
                                error = %err,
                                "failed to replay log record"
                            );
                            return Err(err);
                        }
                    }
                }
                count += 1;
                ctx.set_confirmed(meta.version(), meta.timestamp());
                ctx.update_marker(meta.end_offset())?;
                if mode != RecoverMode::Commit {
                    ctx.sync()?;
                }
                Ok(IterControl::Continue)
            })?;

        if mode == RecoverMode::Commit && count != 1 {
            return Err(LogError::corrupt(format!(
                "expected exactly one unconfirmed record to commit, found {count}"
            )));
        }
        if count > 0 && mode == RecoverMode::Replay {
            tracing::info!(count, version = %self.ctx.version(), "replayed unconfirmed log records");
        }
        Ok(count)
    }
}

/// Applies one decoded record to the database.
pub(crate) fn replay_operation<D: PrincipalDatabase>(
    db: &mut D,
    op: Operation<D::Entry>,
) -> LogResult<()> {
    match op {
        Operation::Create { entry } => db.store(&entry, StoreFlags::NONE),
        Operation::Delete { principal } => db.remove(&principal, StoreFlags::NONE),
        Operation::Rename { source, entry } => {
            db.store(&entry, StoreFlags::NONE)?;
            db.remove(&source, StoreFlags::NONE)
        }
        Operation::Modify { mask, entry } => {
            let mut current = db.fetch(entry.principal())?;
            current.apply_modifications(&entry, mask);
            db.store(&current, StoreFlags::REPLACE)
        }
        Operation::Nop { .. } | Operation::Uber(_) => Ok(()),
    }
}
