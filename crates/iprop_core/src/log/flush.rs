//! Durable append of one encoded record.

use super::context::LogContext;
use super::record::RecordHeader;
use super::LOG_HEADER_SZ;
use crate::error::{LogError, LogResult};
use crate::types::Version;

impl LogContext {
    /// Appends a fully encoded record at the end of the log and syncs.
    ///
    /// The cursor must be at the physical end of the log (all earlier
    /// records confirmed). Unless the log is empty or ends in an uber
    /// record with nominal version 0, the record before the cursor must be
    /// the current version and the new record must be exactly one past it.
    ///
    /// The in-memory version moves to the new record's version; the record
    /// is not confirmed.
    ///
    /// # Errors
    ///
    /// - [`LogError::ReadOnly`] without the exclusive lock
    /// - [`LogError::Corrupt`] when the cursor is not at the end or the
    ///   version sequence would break
    pub fn flush(&mut self, record: &[u8]) -> LogResult<()> {
        if self.is_null() {
            return Ok(());
        }
        self.ensure_writable()?;

        let header_bytes = record
            .get(..LOG_HEADER_SZ as usize)
            .ok_or_else(|| LogError::invalid_argument("record shorter than its header"))?;
        let new_version = RecordHeader::decode(header_bytes)?.version;

        let end = self.size()?;
        if self.position() != end {
            return Err(LogError::corrupt(format!(
                "log position {} is not at end of log {}",
                self.position(),
                end
            )));
        }

        let previous = match self.version_of_record_ending_here() {
            Ok((version, _)) => version,
            Err(LogError::EndOfLog) => Version::ZERO,
            Err(err) => return Err(err),
        };
        if previous != Version::ZERO {
            if previous != self.version() {
                return Err(LogError::corrupt(format!(
                    "last record in log is version {previous} but the log is at version {}",
                    self.version()
                )));
            }
            if new_version != previous.next() {
                tracing::warn!(
                    previous = %previous,
                    new = %new_version,
                    "refusing to write a log record with non-monotonic version"
                );
                return Err(LogError::corrupt(format!(
                    "refusing to write version {new_version} after version {previous}"
                )));
            }
        }

        let backend = self.backend_mut()?;
        backend.append(record)?;
        self.sync()?;
        self.seek(end + record.len() as u64);
        if new_version != Version::ZERO {
            self.set_version(new_version);
        }
        Ok(())
    }
}

impl LogContext {
    /// Appends pre-validated records at the end of the log and syncs.
    pub(crate) fn append_raw(&mut self, records: &[u8]) -> LogResult<()> {
        let end = self.size()?;
        if self.position() != end {
            return Err(LogError::corrupt(format!(
                "log position {} is not at end of log {}",
                self.position(),
                end
            )));
        }
        self.backend_mut()?.append(records)?;
        self.sync()?;
        self.seek(end + records.len() as u64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::record::{encode_record, encode_uber, OpCode, UberPayload};
    use crate::log::LOG_UBER_SZ;
    use crate::signal::NullNotifier;
    use crate::types::Timestamp;
    use iprop_storage::{InMemoryBackend, LockMode};

    fn ctx_with(data: Vec<u8>, lock: LockMode) -> LogContext {
        let mut ctx = LogContext::with_backend(
            Box::new(InMemoryBackend::with_data(data).with_lock_mode(lock)),
            Box::new(NullNotifier),
            0,
        );
        let end = ctx.size().unwrap();
        ctx.seek(end);
        ctx
    }

    fn uber(version: u32) -> Vec<u8> {
        encode_uber(
            Timestamp::new(1),
            &UberPayload {
                next_offset: LOG_UBER_SZ,
                last_timestamp: Timestamp::new(1),
                last_version: Version::new(version),
            },
        )
    }

    fn nop(version: u32) -> Vec<u8> {
        encode_record(Version::new(version), Timestamp::new(2), OpCode::Nop, b"").unwrap()
    }

    #[test]
    fn first_record_after_uber() {
        let mut ctx = ctx_with(uber(0), LockMode::Exclusive);
        ctx.flush(&nop(1)).unwrap();
        assert_eq!(ctx.version(), Version::new(1));
        assert_eq!(ctx.position(), 64);
        assert_eq!(ctx.size().unwrap(), 64);
    }

    #[test]
    fn next_version_must_follow() {
        let mut log = uber(0);
        log.extend(nop(1));
        let mut ctx = ctx_with(log, LockMode::Exclusive);
        ctx.set_version(Version::new(1));

        assert!(ctx.flush(&nop(3)).unwrap_err().is_corrupt());
        assert!(ctx.flush(&nop(1)).unwrap_err().is_corrupt());
        ctx.flush(&nop(2)).unwrap();
        assert_eq!(ctx.version(), Version::new(2));
    }

    #[test]
    fn in_memory_version_must_match_log() {
        let mut log = uber(0);
        log.extend(nop(1));
        let mut ctx = ctx_with(log, LockMode::Exclusive);
        ctx.set_version(Version::new(5));

        assert!(ctx.flush(&nop(2)).unwrap_err().is_corrupt());
    }

    #[test]
    fn cursor_must_be_at_end() {
        let mut ctx = ctx_with(uber(0), LockMode::Exclusive);
        ctx.seek(0);
        assert!(ctx.flush(&nop(1)).unwrap_err().is_corrupt());
    }

    #[test]
    fn read_only_refuses() {
        let mut ctx = ctx_with(uber(0), LockMode::Shared);
        assert!(matches!(ctx.flush(&nop(1)), Err(LogError::ReadOnly)));
    }

    #[test]
    fn null_log_accepts_anything() {
        let mut ctx = LogContext::default();
        ctx.flush(&nop(9)).unwrap();
        assert_eq!(ctx.version(), Version::ZERO);
    }
}
