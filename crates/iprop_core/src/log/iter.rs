//! Walking the log record by record.

use super::context::LogContext;
use super::record::{OpCode, RecordHeader};
use super::{LOG_HEADER_SZ, LOG_WRAPPER_SZ};
use crate::error::{LogError, LogResult};
use crate::types::{Timestamp, Version};
use iprop_storage::LockMode;

/// Direction of a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Oldest to newest.
    Forward,
    /// Newest to oldest.
    Backward,
}

/// Which records a walk visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Records up to the confirmed marker (the uber record included).
    ConfirmedOnly,
    /// Records past the confirmed marker.
    UnconfirmedOnly,
    /// Every record.
    All,
}

/// Whether a walk continues after a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterControl {
    /// Visit the next record.
    Continue,
    /// End the walk successfully.
    Stop,
}

/// A record visited by [`LogContext::for_each`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMeta {
    /// Offset of the record's header.
    pub offset: u64,
    /// The record's header.
    pub header: RecordHeader,
}

impl RecordMeta {
    /// Record version.
    #[must_use]
    pub const fn version(&self) -> Version {
        self.header.version
    }

    /// Record timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> Timestamp {
        self.header.timestamp
    }

    /// Record operation.
    #[must_use]
    pub const fn op(&self) -> OpCode {
        self.header.op
    }

    /// Payload length.
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.header.len
    }

    /// True for an empty payload.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.header.len == 0
    }

    /// Offset of the payload.
    #[must_use]
    pub const fn payload_offset(&self) -> u64 {
        self.offset + LOG_HEADER_SZ
    }

    /// Offset just past the trailer.
    #[must_use]
    pub const fn end_offset(&self) -> u64 {
        self.offset + LOG_WRAPPER_SZ + self.header.len as u64
    }

    /// True for the uber record.
    #[must_use]
    pub fn is_uber(&self) -> bool {
        self.header.is_uber_at(self.offset)
    }
}

/// Outcome of a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IterSummary {
    /// Number of records handed to the callback.
    pub visited: usize,
    /// Forward walks: offset just past the last good record seen (or the
    /// logical end if nothing past it was visited). Backward walks: where
    /// the walk started.
    pub end: u64,
    /// Offset a damaged tail was cut off at, if any.
    pub truncated_at: Option<u64>,
}

enum Halt {
    Done,
    Failed(LogError),
}

impl LogContext {
    /// Visits records in `direction`, restricted to `scope`.
    ///
    /// Each record's trailer is checked against its header before the
    /// callback sees it; the cursor is on the payload during the callback
    /// and the callback may move it freely.
    ///
    /// A forward walk that meets a torn or corrupt record while the
    /// exclusive lock is held cuts the log off at that record's start and
    /// ends successfully. Any other session gets [`LogError::Corrupt`].
    ///
    /// # Errors
    ///
    /// Returns the first error from navigation or from the callback that is
    /// not repaired as above.
    pub fn for_each<F>(&mut self, direction: Direction, scope: Scope, mut f: F) -> LogResult<IterSummary>
    where
        F: FnMut(&mut LogContext, &RecordMeta) -> LogResult<IterControl>,
    {
        if self.is_null() {
            return Ok(IterSummary::default());
        }

        let log_end = self.goto_logical_end()?;
        let mut summary = IterSummary {
            end: log_end,
            ..IterSummary::default()
        };

        match direction {
            Direction::Forward => {
                if scope != Scope::UnconfirmedOnly {
                    self.seek(0);
                }
                self.walk_forward(scope, log_end, &mut summary, &mut f)?;
            }
            Direction::Backward => {
                let stop_at = match scope {
                    Scope::ConfirmedOnly => 0,
                    Scope::UnconfirmedOnly => log_end,
                    Scope::All => 0,
                };
                if scope != Scope::ConfirmedOnly {
                    let real_end = self.real_end(log_end)?;
                    self.seek(real_end);
                    summary.end = real_end;
                }
                self.walk_backward(stop_at, &mut summary, &mut f)?;
            }
        }
        Ok(summary)
    }

    /// Offset just past the last whole record, found by walking the
    /// unconfirmed tail from `log_end`. A damaged tail is cut off under the
    /// exclusive lock as in any forward walk.
    fn real_end(&mut self, log_end: u64) -> LogResult<u64> {
        fn skip(_: &mut LogContext, _: &RecordMeta) -> LogResult<IterControl> {
            Ok(IterControl::Continue)
        }

        let mut summary = IterSummary {
            end: log_end,
            ..IterSummary::default()
        };
        self.seek(log_end);
        self.walk_forward(Scope::UnconfirmedOnly, log_end, &mut summary, &mut skip)?;
        Ok(summary.end)
    }

    fn walk_forward<F>(
        &mut self,
        scope: Scope,
        log_end: u64,
        summary: &mut IterSummary,
        f: &mut F,
    ) -> LogResult<()>
    where
        F: FnMut(&mut LogContext, &RecordMeta) -> LogResult<IterControl>,
    {
        let mut this_entry;
        let halt = loop {
            this_entry = self.position();
            if scope == Scope::ConfirmedOnly && this_entry >= log_end {
                break Halt::Done;
            }
            let meta = match self.frame_at(this_entry) {
                Ok(Some(meta)) => meta,
                Ok(None) => break Halt::Done,
                Err(err) => break Halt::Failed(err),
            };
            self.seek(meta.payload_offset());
            summary.visited += 1;
            match f(self, &meta) {
                Ok(IterControl::Continue) => {}
                Ok(IterControl::Stop) => {
                    summary.end = summary.end.max(meta.end_offset());
                    break Halt::Done;
                }
                Err(err) => break Halt::Failed(err),
            }
            self.seek(meta.end_offset());
            summary.end = summary.end.max(meta.end_offset());
        };

        match halt {
            Halt::Done => Ok(()),
            Halt::Failed(err)
                if err.is_damaged_tail()
                    && self.lock_mode() == LockMode::Exclusive =>
            {
                let which = if this_entry >= log_end { "unconfirmed" } else { "confirmed" };
                tracing::warn!(
                    offset = this_entry,
                    error = %err,
                    "Truncating log at partial or corrupt {which} entry"
                );
                self.backend_mut()?.truncate(this_entry)?;
                self.seek(this_entry);
                summary.end = this_entry;
                summary.truncated_at = Some(this_entry);
                Ok(())
            }
            Halt::Failed(err) => Err(err),
        }
    }

    fn walk_backward<F>(&mut self, stop_at: u64, summary: &mut IterSummary, f: &mut F) -> LogResult<()>
    where
        F: FnMut(&mut LogContext, &RecordMeta) -> LogResult<IterControl>,
    {
        loop {
            let end = self.position();
            if end == 0 || end <= stop_at {
                return Ok(());
            }
            let Some(header) = self.previous_record()? else {
                return Ok(());
            };
            let meta = RecordMeta {
                offset: self.position() - LOG_HEADER_SZ,
                header,
            };
            summary.visited += 1;
            if f(self, &meta)? == IterControl::Stop {
                return Ok(());
            }
            self.seek(meta.offset);
        }
    }

    /// Frames the record starting at `offset`: header, then trailer.
    /// `None` at a clean end of file.
    fn frame_at(&mut self, offset: u64) -> LogResult<Option<RecordMeta>> {
        self.seek(offset);
        let header = match self.read_header() {
            Ok(header) => header,
            Err(LogError::EndOfLog) => return Ok(None),
            Err(err) => return Err(err),
        };
        let meta = RecordMeta { offset, header };
        let trailer = self.read_trailer_at(meta.end_offset() - super::LOG_TRAILER_SZ)?;
        if !header.matches(&trailer) {
            return Err(LogError::corrupt(format!(
                "record at offset {offset}: header (v{}, {} bytes) disagrees with trailer (v{}, {} bytes)",
                header.version, header.len, trailer.version, trailer.len
            )));
        }
        Ok(Some(meta))
    }

    /// Reads the payload of a visited record.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Corrupt`] if the payload is no longer there.
    pub fn read_payload(&self, meta: &RecordMeta) -> LogResult<Vec<u8>> {
        match self.read_at(meta.payload_offset(), meta.len() as usize) {
            Err(LogError::EndOfLog) => Err(LogError::corrupt(format!(
                "payload of record at offset {} runs past end of log",
                meta.offset
            ))),
            other => other,
        }
    }

    /// Reads a visited record whole, header to trailer, as it would be
    /// shipped to a replica.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Corrupt`] if the record is no longer there.
    pub fn read_record(&self, meta: &RecordMeta) -> LogResult<Vec<u8>> {
        let len = (meta.end_offset() - meta.offset) as usize;
        match self.read_at(meta.offset, len) {
            Err(LogError::EndOfLog) => Err(LogError::corrupt(format!(
                "record at offset {} runs past end of log",
                meta.offset
            ))),
            other => other,
        }
    }
}
