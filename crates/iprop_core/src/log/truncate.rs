//! Shrinking the log to its newest confirmed records.

use super::context::LogContext;
use super::iter::{Direction, IterControl, Scope};
use super::record::{encode_uber, OpCode, UberPayload};
use super::{LOG_HEADER_SZ, LOG_UBER_SZ, LOG_WRAPPER_SZ};
use crate::error::{LogError, LogResult};
use crate::types::{Timestamp, Version};

impl LogContext {
    /// Rewrites the log keeping only its newest confirmed records.
    ///
    /// At most `keep` records (0 = no limit) and at most `max_bytes` bytes
    /// of records are kept; `max_bytes` of 0 means the configured maximum
    /// log size (and no limit if that is 0 too). The uber record is never
    /// counted. Versions and timestamps of kept records are preserved.
    ///
    /// The rewrite first records a confirmed offset of 0, so a crash before
    /// it completes leaves an invalid log that the next exclusive open
    /// reinitialises.
    ///
    /// # Errors
    ///
    /// - [`LogError::ReadOnly`] without the exclusive lock
    /// - [`LogError::NothingToKeep`] when no record fits; call
    ///   [`LogContext::reinit`] to empty the log instead
    /// - [`LogError::Corrupt`] when the log changes between the two passes
    pub fn truncate(&mut self, keep: usize, max_bytes: u64) -> LogResult<()> {
        if self.is_null() {
            return Ok(());
        }
        self.ensure_writable()?;

        let max_bytes = match (max_bytes, self.max_log_size()) {
            (0, 0) => u64::MAX,
            (0, configured) => configured,
            (requested, _) => requested,
        };

        // Pass 1: size the tail.
        let mut bytes = 0u64;
        let mut count = 0usize;
        let mut first = Version::ZERO;
        let mut last = Version::ZERO;
        self.for_each(Direction::Backward, Scope::ConfirmedOnly, |_, meta| {
            let entry_len = LOG_WRAPPER_SZ + u64::from(meta.len());
            let total = bytes.saturating_add(entry_len);
            if (meta.op() == OpCode::Nop && entry_len == LOG_UBER_SZ)
                || total > max_bytes
                || (keep > 0 && count == keep)
            {
                return Ok(IterControl::Stop);
            }
            bytes = total;
            first = meta.version();
            if count == 0 {
                last = meta.version();
            }
            count += 1;
            Ok(IterControl::Continue)
        })?;

        if bytes == 0 {
            return Err(LogError::NothingToKeep);
        }

        // Pass 2: copy the same records into a buffer, filling it from the back.
        let mut entries = vec![0u8; bytes as usize];
        let mut p = entries.len();
        let mut remaining = count;
        let mut copied_first = Version::ZERO;
        self.for_each(Direction::Backward, Scope::ConfirmedOnly, |ctx, meta| {
            let entry_len = (LOG_WRAPPER_SZ + u64::from(meta.len())) as usize;
            if p < entry_len {
                return Err(LogError::corrupt("log grew while it was being truncated"));
            }
            let raw = ctx.read_at(meta.payload_offset() - LOG_HEADER_SZ, entry_len)?;
            entries[p - entry_len..p].copy_from_slice(&raw);
            p -= entry_len;
            remaining -= 1;
            copied_first = meta.version();
            Ok(if p == 0 || remaining == 0 {
                IterControl::Stop
            } else {
                IterControl::Continue
            })
        })?;
        if remaining != 0 || p != 0 || copied_first != first {
            return Err(LogError::corrupt("log changed while it was being truncated"));
        }

        let now = Timestamp::now();
        if let Err(err) = self.rewrite(now, last, &entries) {
            tracing::warn!(error = %err, "unable to keep log entries, emptying the log");
            let size = self.size().unwrap_or(0);
            if let Err(cleanup) = self.backend_mut()?.truncate(LOG_UBER_SZ.min(size)) {
                tracing::warn!(error = %cleanup, "unable to cut the log back after a failed rewrite");
            }
            self.seek(0);
            return Err(err);
        }

        // Rebuild the in-memory state from the rewritten log.
        let end = self.goto_logical_end()?;
        self.seek(end);
        let (version, last_time) = self.version_of_record_ending_here()?;
        self.set_confirmed(version, last_time);
        tracing::info!(kept = count, first = %first, last = %last, bytes, "log truncated");
        Ok(())
    }

    fn rewrite(&mut self, now: Timestamp, last: Version, entries: &[u8]) -> LogResult<()> {
        let uber = encode_uber(
            now,
            &UberPayload {
                next_offset: 0,
                last_timestamp: now,
                last_version: last,
            },
        );
        let backend = self.backend_mut()?;
        backend.truncate(0)?;
        backend.append(&uber)?;
        backend.append(entries)?;
        backend.flush()?;
        backend.sync()?;
        let confirmed = LOG_UBER_SZ + entries.len() as u64;
        backend.write_at(LOG_HEADER_SZ, &confirmed.to_be_bytes())?;
        backend.sync()?;
        self.seek(confirmed);
        Ok(())
    }

    /// Truncates to a quarter of the maximum log size if the log has grown
    /// past it. Finding nothing to keep is not an error.
    ///
    /// # Errors
    ///
    /// Returns any truncation error other than [`LogError::NothingToKeep`].
    pub fn truncate_if_needed(&mut self) -> LogResult<()> {
        if self.is_null() || self.is_read_only() {
            return Ok(());
        }
        let max = self.max_log_size();
        if max == 0 || self.size()? <= max {
            return Ok(());
        }
        match self.truncate(0, max / 4) {
            Err(LogError::NothingToKeep) => Ok(()),
            other => other,
        }
    }
}
