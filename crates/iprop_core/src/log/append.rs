//! Logging mutations, and taking in records shipped from a master.

use super::engine::IpropLog;
use super::record::{encode_record, NopKind, OpCode, Operation, RecordHeader, RecordTrailer};
use super::recovery::{replay_operation, RecoverMode};
use super::{LOG_HEADER_SZ, LOG_TRAILER_SZ, LOG_WRAPPER_SZ};
use crate::database::{LogEntry, ModifyMask, PrincipalDatabase, StoreFlags};
use crate::error::{LogError, LogResult};
use crate::principal::Principal;
use crate::types::Timestamp;

impl<D: PrincipalDatabase> IpropLog<D> {
    /// Logs and applies the creation of `entry`.
    ///
    /// # Errors
    ///
    /// Returns `EntryExists` if the principal exists (nothing is logged),
    /// or any log or database error.
    pub fn create(&mut self, entry: &D::Entry) -> LogResult<()> {
        if self.ctx.is_null() {
            return self.db.store(entry, StoreFlags::NONE);
        }
        self.db.store(entry, StoreFlags::PRECHECK)?;
        self.append(Operation::Create {
            entry: entry.clone(),
        })
    }

    /// Logs and applies the removal of `principal`.
    ///
    /// # Errors
    ///
    /// Returns `EntryNotFound` if the principal is absent (nothing is
    /// logged), or any log or database error.
    pub fn delete(&mut self, principal: &Principal) -> LogResult<()> {
        if self.ctx.is_null() {
            return self.db.remove(principal, StoreFlags::NONE);
        }
        self.db.remove(principal, StoreFlags::PRECHECK)?;
        self.append(Operation::Delete {
            principal: principal.clone(),
        })
    }

    /// Logs and applies renaming `source` to the principal of `entry`.
    ///
    /// # Errors
    ///
    /// Returns `EntryExists` if the new name is taken or `EntryNotFound` if
    /// `source` is absent (nothing is logged), or any log or database error.
    pub fn rename(&mut self, source: &Principal, entry: &D::Entry) -> LogResult<()> {
        if self.ctx.is_null() {
            self.db.store(entry, StoreFlags::NONE)?;
            return self.db.remove(source, StoreFlags::NONE);
        }
        self.db.store(entry, StoreFlags::PRECHECK)?;
        self.db.remove(source, StoreFlags::PRECHECK)?;
        self.append(Operation::Rename {
            source: source.clone(),
            entry: entry.clone(),
        })
    }

    /// Logs and applies copying the attributes selected by `mask` from
    /// `entry` onto the stored entry of the same principal.
    ///
    /// # Errors
    ///
    /// Returns `EntryNotFound` if the principal is absent (nothing is
    /// logged), or any log or database error.
    pub fn modify(&mut self, entry: &D::Entry, mask: ModifyMask) -> LogResult<()> {
        if self.ctx.is_null() {
            return replay_operation(
                &mut self.db,
                Operation::Modify {
                    mask,
                    entry: entry.clone(),
                },
            );
        }
        self.db.fetch(entry.principal())?;
        self.db.store(entry, StoreFlags::REPLACE.with_precheck())?;
        self.append(Operation::Modify {
            mask,
            entry: entry.clone(),
        })
    }

    /// Logs a nop of the given kind.
    ///
    /// On an empty log this writes the uber record first; a plain nop then
    /// writes nothing else.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::ReadOnly`] without the exclusive lock, or any log
    /// error.
    pub fn nop(&mut self, kind: NopKind) -> LogResult<()> {
        if self.ctx.is_null() {
            return Ok(());
        }
        self.ctx.ensure_writable()?;
        if self.ctx.size()? == 0 {
            self.ctx.write_uber()?;
            if kind == NopKind::Plain {
                return Ok(());
            }
        }
        self.append(Operation::Nop { kind })
    }

    fn append(&mut self, op: Operation<D::Entry>) -> LogResult<()> {
        self.ctx.ensure_writable()?;
        let payload = op.encode_payload()?;
        let end = self.ctx.goto_logical_end()?;
        self.ctx.seek(end);
        let version = self.ctx.version().next();
        let record = encode_record(version, Timestamp::now(), op.op_code(), &payload)?;
        self.ctx.flush(&record)?;
        tracing::debug!(%version, op = %op.op_code(), len = payload.len(), "appended log record");
        self.recover(RecoverMode::Commit).map(|_| ())
    }

    /// Appends records received from a master and replays them.
    ///
    /// `records` must be whole, well-framed records whose versions continue
    /// the log's current version without gaps. They are written, synced and
    /// then replayed; returns how many records were confirmed.
    ///
    /// # Errors
    ///
    /// - [`LogError::Corrupt`] if the batch is malformed or out of sequence
    ///   (nothing is written)
    /// - [`LogError::ReadOnly`] without the exclusive lock
    /// - any replay error; records from the failing one on stay unconfirmed
    pub fn append_shipped(&mut self, records: &[u8]) -> LogResult<usize> {
        if self.ctx.is_null() {
            return Err(LogError::invalid_argument(
                "a null log cannot take shipped records",
            ));
        }
        self.ctx.ensure_writable()?;

        // Anything left unconfirmed must go first so the batch lands at the end.
        self.recover(RecoverMode::Replay)?;

        let count = validate_batch(records, self.ctx.version())?;
        if count == 0 {
            return Ok(0);
        }

        let end = self.ctx.size()?;
        self.ctx.seek(end);
        self.ctx.append_raw(records)?;
        self.recover(RecoverMode::Replay)
    }
}

/// Checks that `records` is a run of whole records continuing `current`.
fn validate_batch(records: &[u8], current: crate::types::Version) -> LogResult<usize> {
    let mut offset = 0usize;
    let mut expected = current.next();
    let mut count = 0usize;
    while offset < records.len() {
        let header_end = offset + LOG_HEADER_SZ as usize;
        let header_bytes = records.get(offset..header_end).ok_or_else(|| {
            LogError::corrupt(format!("shipped batch ends inside the header at {offset}"))
        })?;
        let header = RecordHeader::decode(header_bytes)?;
        let end = offset + LOG_WRAPPER_SZ as usize + header.len as usize;
        let trailer_bytes = records
            .get(end - LOG_TRAILER_SZ as usize..end)
            .ok_or_else(|| LogError::corrupt(format!("shipped record at {offset} is truncated")))?;
        let trailer = RecordTrailer::decode(trailer_bytes)?;
        if !header.matches(&trailer) {
            return Err(LogError::corrupt(format!(
                "shipped record at {offset}: header and trailer disagree"
            )));
        }
        if header.op == OpCode::Nop && header.version.as_u32() == 0 {
            return Err(LogError::corrupt("shipped batch contains an uber record"));
        }
        if header.version != expected {
            return Err(LogError::corrupt(format!(
                "shipped record version {} does not follow {}",
                header.version,
                expected.as_u32().wrapping_sub(1)
            )));
        }
        expected = expected.next();
        offset = end;
        count += 1;
    }
    Ok(count)
}
