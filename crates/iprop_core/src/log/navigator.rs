//! Moving between record boundaries.

use super::context::LogContext;
use super::record::{RecordHeader, RecordTrailer, UberPayload};
use super::{LOG_HEADER_SZ, LOG_TRAILER_SZ, LOG_UBER_LEN, LOG_WRAPPER_SZ};
use crate::error::{LogError, LogResult};
use crate::types::{Timestamp, Version};

impl LogContext {
    /// Moves the cursor from the end of a record to its start.
    ///
    /// Returns `None` at offset 0, otherwise the trailer of the record that
    /// ended at the cursor.
    pub(crate) fn seek_previous_start(&mut self) -> LogResult<Option<RecordTrailer>> {
        let end = self.position();
        if end == 0 {
            return Ok(None);
        }
        if end < LOG_WRAPPER_SZ {
            return Err(LogError::corrupt(format!(
                "offset {end} is inside the first record"
            )));
        }
        let trailer = self.read_trailer_at(end - LOG_TRAILER_SZ)?;
        let record_len = LOG_WRAPPER_SZ + u64::from(trailer.len);
        if end < record_len {
            return Err(LogError::corrupt(format!(
                "trailer at offset {} claims a {}-byte payload before the start of the log",
                end - LOG_TRAILER_SZ,
                trailer.len
            )));
        }
        self.seek(end - record_len);
        Ok(Some(trailer))
    }

    /// Moves the cursor from the start of a record to the start of the next.
    ///
    /// # Errors
    ///
    /// [`LogError::EndOfLog`] at a clean end of file, [`LogError::Corrupt`]
    /// if the record is torn or its trailer disagrees with its header.
    pub(crate) fn seek_next_start(&mut self) -> LogResult<RecordHeader> {
        let start = self.position();
        let header = self.read_header()?;
        let trailer = self.read_trailer_at(start + LOG_HEADER_SZ + u64::from(header.len))?;
        if !header.matches(&trailer) {
            self.seek(start);
            return Err(LogError::corrupt(format!(
                "record at offset {start}: header (v{}, {} bytes) disagrees with trailer (v{}, {} bytes)",
                header.version, header.len, trailer.version, trailer.len
            )));
        }
        self.seek(start + LOG_WRAPPER_SZ + u64::from(header.len));
        Ok(header)
    }

    /// Reads the record ending at the cursor, leaving the cursor on its
    /// payload.
    pub(crate) fn previous_record(&mut self) -> LogResult<Option<RecordHeader>> {
        let Some(trailer) = self.seek_previous_start()? else {
            return Ok(None);
        };
        let start = self.position();
        let header = self.read_header().map_err(|err| match err {
            LogError::EndOfLog => LogError::corrupt(format!("missing record header at offset {start}")),
            other => other,
        })?;
        if !header.matches(&trailer) {
            return Err(LogError::corrupt(format!(
                "record at offset {start}: header (v{}, {} bytes) disagrees with trailer (v{}, {} bytes)",
                header.version, header.len, trailer.version, trailer.len
            )));
        }
        Ok(Some(header))
    }

    /// Version and timestamp of the record ending at the cursor. The cursor
    /// is left where it was.
    ///
    /// For the uber record this is the nominal version and timestamp it
    /// caches, not its own header fields.
    ///
    /// # Errors
    ///
    /// [`LogError::EndOfLog`] at offset 0, [`LogError::Corrupt`] if the
    /// record cannot be framed.
    pub(crate) fn version_of_record_ending_here(&mut self) -> LogResult<(Version, Timestamp)> {
        let saved = self.position();
        let result = self.version_before(saved);
        self.seek(saved);
        result
    }

    fn version_before(&mut self, end: u64) -> LogResult<(Version, Timestamp)> {
        if end == 0 {
            return Err(LogError::EndOfLog);
        }
        let Some(header) = self.previous_record()? else {
            return Err(LogError::EndOfLog);
        };
        let start = self.position() - LOG_HEADER_SZ;
        if header.is_uber_at(start) {
            let uber = self.read_uber_payload()?;
            return Ok((uber.last_version, uber.last_timestamp));
        }
        Ok((header.version, header.timestamp))
    }

    /// Reads the uber record's payload: the confirmed end offset and the
    /// cached last version and timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Corrupt`] if the payload is cut short.
    pub fn read_uber_payload(&self) -> LogResult<UberPayload> {
        match self.read_at(LOG_HEADER_SZ, LOG_UBER_LEN as usize) {
            Ok(raw) => UberPayload::decode(&raw),
            Err(LogError::EndOfLog) => Err(LogError::corrupt("uber record payload is truncated")),
            Err(err) => Err(err),
        }
    }
}
