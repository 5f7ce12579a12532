//! Big-endian byte helpers shared by the record, principal and entry codecs.

use crate::error::{LogError, LogResult};

/// A cursor over an encoded payload.
#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Starts reading at the beginning of `buf`.
    #[must_use]
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Returns the number of unread bytes.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Returns the unread tail without consuming it.
    #[must_use]
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// Consumes `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidPayload`] if fewer than `len` bytes remain.
    pub fn bytes(&mut self, len: usize) -> LogResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(LogError::invalid_payload(format!(
                "unexpected end of payload: need {} bytes at {}, have {}",
                len,
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    /// Reads a big-endian `u32`.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidPayload`] on a short buffer.
    pub fn u32(&mut self) -> LogResult<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.bytes(4)?);
        Ok(u32::from_be_bytes(raw))
    }

    /// Reads a big-endian `u64`.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidPayload`] on a short buffer.
    pub fn u64(&mut self) -> LogResult<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.bytes(8)?);
        Ok(u64::from_be_bytes(raw))
    }

    /// Reads a `u32`-length-prefixed byte string.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidPayload`] on a short buffer.
    pub fn data(&mut self) -> LogResult<&'a [u8]> {
        let len = self.u32()? as usize;
        self.bytes(len)
    }

    /// Reads a `u32`-length-prefixed UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidPayload`] on a short buffer or invalid
    /// UTF-8.
    pub fn string(&mut self) -> LogResult<String> {
        let raw = self.data()?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| LogError::invalid_payload("string is not valid UTF-8"))
    }

    /// Reads an optional big-endian `u32` encoded as a presence flag word
    /// followed by the value when present.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidPayload`] on a short buffer or a flag
    /// other than 0 or 1.
    pub fn optional_u32(&mut self) -> LogResult<Option<u32>> {
        match self.u32()? {
            0 => Ok(None),
            1 => Ok(Some(self.u32()?)),
            other => Err(LogError::invalid_payload(format!(
                "invalid presence flag {other}"
            ))),
        }
    }

    /// Fails if any bytes remain unread.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidPayload`] when trailing bytes remain.
    pub fn finish(&self) -> LogResult<()> {
        if self.remaining() != 0 {
            return Err(LogError::invalid_payload(format!(
                "{} trailing bytes in payload",
                self.remaining()
            )));
        }
        Ok(())
    }
}

/// Appends a big-endian `u32`.
pub fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

/// Appends a big-endian `u64`.
pub fn put_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_be_bytes());
}

/// Appends a `u32`-length-prefixed byte string.
pub fn put_data(buf: &mut Vec<u8>, data: &[u8]) {
    put_u32(buf, data.len() as u32);
    buf.extend_from_slice(data);
}

/// Appends an optional `u32` as a presence flag word and the value.
pub fn put_optional_u32(buf: &mut Vec<u8>, value: Option<u32>) {
    match value {
        Some(v) => {
            put_u32(buf, 1);
            put_u32(buf, v);
        }
        None => put_u32(buf, 0),
    }
}
