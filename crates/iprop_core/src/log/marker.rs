//! The uber record: locating the logical end, reading and advancing the
//! confirmed marker, and (re)initialising an empty log.

use super::context::LogContext;
use super::record::{encode_uber, UberPayload};
use super::{LOG_HEADER_SZ, LOG_UBER_LEN, LOG_UBER_SZ};
use crate::error::{LogError, LogResult};
use crate::types::{Timestamp, Version};
use iprop_storage::LockMode;

/// Which version [`LogContext::read_marker`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// The oldest record after the uber record.
    First,
    /// The last confirmed record.
    Last,
    /// The uber record itself (detects old-format logs).
    Uber,
}

impl LogContext {
    /// Positions the cursor at the logical end of the log (just past the
    /// last confirmed record) and returns that offset.
    ///
    /// - An empty log ends at 0.
    /// - An old-format log ends at its physical end.
    /// - An uber record whose offset is unusable makes the log invalid: an
    ///   exclusive session reinitialises it at version 0, any other session
    ///   gets [`LogError::Corrupt`].
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or is invalid and cannot
    /// be reinitialised.
    pub fn goto_logical_end(&mut self) -> LogResult<u64> {
        if self.is_null() {
            self.seek(0);
            return Ok(0);
        }
        self.seek(0);
        let header = match self.read_header() {
            Ok(header) => header,
            Err(LogError::EndOfLog) => {
                self.seek(0);
                return Ok(0);
            }
            Err(err @ LogError::Corrupt { .. }) => return self.reinit_invalid(err),
            Err(err) => return Err(err),
        };

        if !header.is_uber_at(0) {
            tracing::warn!(path = ?self.path(), "old-format log found; truncate it to upgrade");
            let end = self.size()?;
            self.seek(end);
            return match self.version_of_record_ending_here() {
                Ok(_) => Ok(end),
                Err(err @ LogError::Corrupt { .. }) => self.reinit_invalid(err),
                Err(err) => Err(err),
            };
        }

        let next = match self.read_uber_payload() {
            Ok(uber) => uber.next_offset,
            Err(err) => return self.reinit_invalid(err),
        };
        if next < LOG_UBER_SZ || next > self.size()? {
            return self.reinit_invalid(LogError::corrupt(format!(
                "uber record points at offset {next}"
            )));
        }
        self.seek(next);
        match self.version_of_record_ending_here() {
            Ok(_) => Ok(next),
            Err(err) => self.reinit_invalid(err),
        }
    }

    fn reinit_invalid(&mut self, err: LogError) -> LogResult<u64> {
        if self.lock_mode() != LockMode::Exclusive {
            return Err(err);
        }
        tracing::warn!(path = ?self.path(), error = %err, "invalid log; reinitialising");
        self.reinit(Version::ZERO)?;
        let end = self.size()?;
        self.seek(end);
        Ok(end)
    }

    /// Positions the cursor at the first record after the uber record.
    pub(crate) fn goto_first(&mut self) -> LogResult<()> {
        self.seek(0);
        match self.peek_header() {
            Ok(header) if header.is_uber_at(0) => {
                self.seek_next_start()?;
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Reads one of the log's version markers.
    ///
    /// A null-sink log reports version 0 for every marker.
    ///
    /// # Errors
    ///
    /// - [`LogError::NeedsUpgrade`] for `Uber` on an old-format log
    /// - [`LogError::EndOfLog`] for `First` on a log without records, and
    ///   for `Uber`/`Last` on an empty file
    pub fn read_marker(&mut self, which: Marker) -> LogResult<(Version, Timestamp)> {
        if self.is_null() {
            return Ok((Version::ZERO, Timestamp::default()));
        }
        match which {
            Marker::Uber => {
                self.seek(0);
                let header = self.peek_header()?;
                if !header.is_uber_at(0) {
                    return Err(LogError::NeedsUpgrade);
                }
                Ok((header.version, header.timestamp))
            }
            Marker::First => {
                self.goto_first()?;
                let header = self.peek_header()?;
                Ok((header.version, header.timestamp))
            }
            Marker::Last => {
                self.goto_logical_end()?;
                self.version_of_record_ending_here()
            }
        }
    }

    /// Advances the confirmed marker to `next_offset` and announces the
    /// current version.
    ///
    /// The write is not synced; callers that need durability sync
    /// afterwards. Old-format logs have no marker and only move the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::ReadOnly`] without the exclusive lock.
    pub fn update_marker(&mut self, next_offset: u64) -> LogResult<()> {
        if self.is_null() {
            return Ok(());
        }
        self.ensure_writable()?;

        self.seek(0);
        let has_uber = match self.peek_header() {
            Ok(header) => header.is_uber_at(0),
            Err(LogError::EndOfLog) => false,
            Err(err) => return Err(err),
        };
        if has_uber {
            let payload = UberPayload {
                next_offset,
                last_timestamp: self.last_time(),
                last_version: self.version(),
            };
            self.backend_mut()?.write_at(LOG_HEADER_SZ, &payload.encode())?;
        }
        self.notify();
        self.seek(next_offset);
        Ok(())
    }

    /// Writes the uber record into an empty log, caching the current
    /// version and timestamp, and syncs.
    pub(crate) fn write_uber(&mut self) -> LogResult<()> {
        let payload = UberPayload {
            next_offset: LOG_UBER_SZ,
            last_timestamp: self.last_time(),
            last_version: self.version(),
        };
        let record = encode_uber(Timestamp::now(), &payload);
        debug_assert_eq!(record.len() as u64, LOG_UBER_SZ);
        debug_assert_eq!(payload.encode().len() as u64, LOG_UBER_LEN);
        self.backend_mut()?.append(&record)?;
        self.sync()?;
        self.seek(LOG_UBER_SZ);
        Ok(())
    }

    /// Empties the log and starts over at nominal version `version`.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::ReadOnly`] without the exclusive lock.
    pub fn reinit(&mut self, version: Version) -> LogResult<()> {
        if self.is_null() {
            self.set_version(version);
            return Ok(());
        }
        self.ensure_writable()?;
        self.backend_mut()?.truncate(0)?;
        self.seek(0);
        self.set_version(version);
        self.write_uber()?;
        tracing::info!(path = ?self.path(), %version, "log reinitialised");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::record::{encode_record, OpCode};
    use crate::signal::NullNotifier;
    use iprop_storage::InMemoryBackend;

    fn ctx_with(data: Vec<u8>, lock: LockMode) -> LogContext {
        LogContext::with_backend(
            Box::new(InMemoryBackend::with_data(data).with_lock_mode(lock)),
            Box::new(NullNotifier),
            0,
        )
    }

    fn uber(next: u64, version: u32) -> Vec<u8> {
        encode_uber(
            Timestamp::new(100),
            &UberPayload {
                next_offset: next,
                last_timestamp: Timestamp::new(99),
                last_version: Version::new(version),
            },
        )
    }

    fn nop(version: u32) -> Vec<u8> {
        encode_record(Version::new(version), Timestamp::new(200 + version), OpCode::Nop, b"").unwrap()
    }

    #[test]
    fn empty_log_ends_at_zero() {
        let mut ctx = ctx_with(Vec::new(), LockMode::Exclusive);
        assert_eq!(ctx.goto_logical_end().unwrap(), 0);
    }

    #[test]
    fn logical_end_follows_uber_offset() {
        let mut log = uber(64, 0);
        log.extend(nop(1));
        log.extend(nop(2));
        let mut ctx = ctx_with(log, LockMode::Shared);

        assert_eq!(ctx.goto_logical_end().unwrap(), 64);
        assert_eq!(ctx.position(), 64);
        assert_eq!(ctx.read_marker(Marker::Last).unwrap().0, Version::new(1));
    }

    #[test]
    fn old_log_ends_at_physical_end() {
        let mut log = nop(5);
        log.extend(nop(6));
        let mut ctx = ctx_with(log, LockMode::Shared);

        assert_eq!(ctx.goto_logical_end().unwrap(), 48);
        assert!(matches!(ctx.read_marker(Marker::Uber), Err(LogError::NeedsUpgrade)));
        assert_eq!(ctx.read_marker(Marker::First).unwrap().0, Version::new(5));
        assert_eq!(ctx.read_marker(Marker::Last).unwrap().0, Version::new(6));
    }

    #[test]
    fn invalid_uber_offset_reinitialises_under_exclusive_lock() {
        let mut log = uber(52, 3);
        log.extend(nop(4));
        let mut ctx = ctx_with(log, LockMode::Exclusive);
        ctx.set_version(Version::new(4));

        assert_eq!(ctx.goto_logical_end().unwrap(), LOG_UBER_SZ);
        assert_eq!(ctx.size().unwrap(), LOG_UBER_SZ);
        assert_eq!(ctx.version(), Version::ZERO);
        assert_eq!(ctx.read_marker(Marker::Last).unwrap().0, Version::ZERO);
    }

    #[test]
    fn invalid_uber_offset_is_corrupt_for_readers() {
        let mut log = uber(20, 3);
        log.extend(nop(4));
        let mut ctx = ctx_with(log, LockMode::Shared);
        assert!(ctx.goto_logical_end().unwrap_err().is_corrupt());
    }

    #[test]
    fn first_marker_skips_uber() {
        let mut log = uber(64, 0);
        log.extend(nop(1));
        let mut ctx = ctx_with(log, LockMode::Shared);
        assert_eq!(ctx.read_marker(Marker::First).unwrap(), (Version::new(1), Timestamp::new(201)));

        let mut ctx = ctx_with(uber(40, 9), LockMode::Shared);
        assert!(ctx.read_marker(Marker::First).unwrap_err().is_end_of_log());
        assert_eq!(ctx.read_marker(Marker::Last).unwrap().0, Version::new(9));
        assert_eq!(ctx.read_marker(Marker::Uber).unwrap().0, Version::ZERO);
    }

    #[test]
    fn update_marker_rewrites_uber_payload() {
        let mut log = uber(40, 0);
        log.extend(nop(1));
        let mut ctx = ctx_with(log, LockMode::Exclusive);
        ctx.set_confirmed(Version::new(1), Timestamp::new(201));

        ctx.update_marker(64).unwrap();
        assert_eq!(ctx.position(), 64);
        let uber = ctx.read_uber_payload().unwrap();
        assert_eq!(uber.next_offset, 64);
        assert_eq!(uber.last_version, Version::new(1));
        assert_eq!(uber.last_timestamp, Timestamp::new(201));
    }

    #[test]
    fn update_marker_requires_exclusive_lock() {
        let mut ctx = ctx_with(uber(40, 0), LockMode::Shared);
        assert!(matches!(ctx.update_marker(40), Err(LogError::ReadOnly)));
    }

    #[test]
    fn reinit_writes_only_uber() {
        let mut log = uber(64, 0);
        log.extend(nop(1));
        let mut ctx = ctx_with(log, LockMode::Exclusive);

        ctx.reinit(Version::new(77)).unwrap();
        assert_eq!(ctx.size().unwrap(), LOG_UBER_SZ);
        assert_eq!(ctx.version(), Version::new(77));
        assert_eq!(ctx.read_marker(Marker::Last).unwrap().0, Version::new(77));
    }

    #[test]
    fn null_log_markers_are_zero() {
        let mut ctx = LogContext::default();
        assert_eq!(ctx.read_marker(Marker::Last).unwrap().0, Version::ZERO);
        assert_eq!(ctx.goto_logical_end().unwrap(), 0);
        ctx.update_marker(123).unwrap();
    }
}
