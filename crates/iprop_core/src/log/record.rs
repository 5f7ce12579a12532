//! Record framing and payload codecs.
//!
//! Every record is
//!
//! ```text
//! [version: u32][timestamp: u32][op: u32][len: u32]   header, 16 bytes
//! [payload: len bytes]
//! [len: u32][version: u32]                            trailer, 8 bytes
//! ```
//!
//! all big-endian. The trailer repeats the length and version so the log
//! can be walked backwards.

use super::{LOG_HEADER_SZ, LOG_TRAILER_SZ, LOG_UBER_LEN};
use crate::bytes::{put_u32, put_u64, ByteReader};
use crate::database::{LogEntry, ModifyMask};
use crate::error::{LogError, LogResult};
use crate::principal::Principal;
use crate::types::{Timestamp, Version};
use std::fmt;

/// Operation carried by a record.
///
/// Values follow the kadm5 administration operation numbering; only the
/// operations that change the database (plus `Nop`) ever reach the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum OpCode {
    /// Remove a principal.
    Delete = 1,
    /// Add a principal.
    Create = 2,
    /// Rename a principal.
    Rename = 3,
    /// Change selected attributes of a principal.
    Modify = 5,
    /// No database change.
    Nop = 10,
}

impl OpCode {
    /// Converts a raw value to an operation.
    #[must_use]
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::Delete),
            2 => Some(Self::Create),
            3 => Some(Self::Rename),
            5 => Some(Self::Modify),
            10 => Some(Self::Nop),
            _ => None,
        }
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Returns the lower-case operation name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Create => "create",
            Self::Rename => "rename",
            Self::Modify => "modify",
            Self::Nop => "nop",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of a nop record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum NopKind {
    /// Plain acknowledgement; empty payload.
    #[default]
    Plain = 0,
    /// Marks a truncation point.
    Truncate = 1,
    /// Marks the close of a log.
    Close = 2,
}

impl NopKind {
    /// Converts a raw value to a nop kind.
    #[must_use]
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Plain),
            1 => Some(Self::Truncate),
            2 => Some(Self::Close),
            _ => None,
        }
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

/// A decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Record version.
    pub version: Version,
    /// Seconds since the Unix epoch when the record was written.
    pub timestamp: Timestamp,
    /// Operation.
    pub op: OpCode,
    /// Payload length.
    pub len: u32,
}

impl RecordHeader {
    /// Encodes the header.
    #[must_use]
    pub fn encode(&self) -> [u8; LOG_HEADER_SZ as usize] {
        let mut out = [0u8; LOG_HEADER_SZ as usize];
        out[0..4].copy_from_slice(&self.version.as_u32().to_be_bytes());
        out[4..8].copy_from_slice(&self.timestamp.as_u32().to_be_bytes());
        out[8..12].copy_from_slice(&self.op.as_u32().to_be_bytes());
        out[12..16].copy_from_slice(&self.len.to_be_bytes());
        out
    }

    /// Decodes a header.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Corrupt`] if `bytes` is not exactly a header or
    /// carries an unknown operation.
    pub fn decode(bytes: &[u8]) -> LogResult<Self> {
        if bytes.len() != LOG_HEADER_SZ as usize {
            return Err(LogError::corrupt(format!(
                "record header is {} bytes, expected {}",
                bytes.len(),
                LOG_HEADER_SZ
            )));
        }
        let word = |i: usize| u32::from_be_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        let raw_op = word(8);
        let op = OpCode::from_u32(raw_op)
            .ok_or_else(|| LogError::corrupt(format!("unknown operation code {raw_op}")))?;
        Ok(Self {
            version: Version::new(word(0)),
            timestamp: Timestamp::new(word(4)),
            op,
            len: word(12),
        })
    }

    /// Returns true if this header describes an uber record, given that it
    /// sits at `offset`.
    #[must_use]
    pub fn is_uber_at(&self, offset: u64) -> bool {
        offset == 0
            && self.op == OpCode::Nop
            && u64::from(self.len) == LOG_UBER_LEN
            && self.version == Version::ZERO
    }

    /// Returns true if `trailer` closes the record this header opens.
    #[must_use]
    pub fn matches(&self, trailer: &RecordTrailer) -> bool {
        self.len == trailer.len && self.version == trailer.version
    }
}

/// A decoded record trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordTrailer {
    /// Payload length (repeated).
    pub len: u32,
    /// Record version (repeated).
    pub version: Version,
}

impl RecordTrailer {
    /// Encodes the trailer.
    #[must_use]
    pub fn encode(&self) -> [u8; LOG_TRAILER_SZ as usize] {
        let mut out = [0u8; LOG_TRAILER_SZ as usize];
        out[0..4].copy_from_slice(&self.len.to_be_bytes());
        out[4..8].copy_from_slice(&self.version.as_u32().to_be_bytes());
        out
    }

    /// Decodes a trailer.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Corrupt`] if `bytes` is not exactly a trailer.
    pub fn decode(bytes: &[u8]) -> LogResult<Self> {
        if bytes.len() != LOG_TRAILER_SZ as usize {
            return Err(LogError::corrupt(format!(
                "record trailer is {} bytes, expected {}",
                bytes.len(),
                LOG_TRAILER_SZ
            )));
        }
        Ok(Self {
            len: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            version: Version::new(u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]])),
        })
    }
}

/// Payload of the uber record at offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UberPayload {
    /// Offset just past the last confirmed record.
    pub next_offset: u64,
    /// Timestamp of the last confirmed record.
    pub last_timestamp: Timestamp,
    /// Version of the last confirmed record.
    pub last_version: Version,
}

impl UberPayload {
    /// Encodes the payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(LOG_UBER_LEN as usize);
        put_u64(&mut buf, self.next_offset);
        put_u32(&mut buf, self.last_timestamp.as_u32());
        put_u32(&mut buf, self.last_version.as_u32());
        buf
    }

    /// Decodes the payload.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Corrupt`] if `bytes` is not exactly 16 bytes.
    pub fn decode(bytes: &[u8]) -> LogResult<Self> {
        if bytes.len() != LOG_UBER_LEN as usize {
            return Err(LogError::corrupt(format!(
                "uber payload is {} bytes, expected {}",
                bytes.len(),
                LOG_UBER_LEN
            )));
        }
        let mut reader = ByteReader::new(bytes);
        Ok(Self {
            next_offset: reader.u64()?,
            last_timestamp: Timestamp::new(reader.u32()?),
            last_version: Version::new(reader.u32()?),
        })
    }
}

/// A decoded record payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation<E> {
    /// Add `entry`.
    Create {
        /// The new entry.
        entry: E,
    },
    /// Remove `principal`.
    Delete {
        /// The principal to remove.
        principal: Principal,
    },
    /// Replace `source` by `entry` (which carries the new name).
    Rename {
        /// The old name.
        source: Principal,
        /// The entry under its new name.
        entry: E,
    },
    /// Copy the attributes selected by `mask` from `entry`.
    Modify {
        /// Attributes to change.
        mask: ModifyMask,
        /// Entry holding the new attribute values.
        entry: E,
    },
    /// No database change.
    Nop {
        /// The nop kind.
        kind: NopKind,
    },
    /// The uber record's bookkeeping payload.
    Uber(UberPayload),
}

impl<E: LogEntry> Operation<E> {
    /// Returns the operation code this payload is logged under.
    #[must_use]
    pub fn op_code(&self) -> OpCode {
        match self {
            Self::Create { .. } => OpCode::Create,
            Self::Delete { .. } => OpCode::Delete,
            Self::Rename { .. } => OpCode::Rename,
            Self::Modify { .. } => OpCode::Modify,
            Self::Nop { .. } | Self::Uber(_) => OpCode::Nop,
        }
    }

    /// Encodes the payload.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry cannot be encoded.
    pub fn encode_payload(&self) -> LogResult<Vec<u8>> {
        let buf = match self {
            Self::Create { entry } => entry.encode()?,
            Self::Delete { principal } => principal.encode(),
            Self::Rename { source, entry } => {
                let mut buf = source.encode();
                buf.extend_from_slice(&entry.encode()?);
                buf
            }
            Self::Modify { mask, entry } => {
                let mut buf = Vec::new();
                put_u32(&mut buf, mask.0);
                buf.extend_from_slice(&entry.encode()?);
                buf
            }
            Self::Nop { kind: NopKind::Plain } => Vec::new(),
            Self::Nop { kind } => kind.as_u32().to_be_bytes().to_vec(),
            Self::Uber(uber) => uber.encode(),
        };
        Ok(buf)
    }

    /// Decodes the payload of a record logged under `op`.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidPayload`] on malformed bytes.
    pub fn decode(op: OpCode, payload: &[u8]) -> LogResult<Self> {
        match op {
            OpCode::Create => Ok(Self::Create {
                entry: E::decode(payload)?,
            }),
            OpCode::Delete => Ok(Self::Delete {
                principal: Principal::decode(payload)?,
            }),
            OpCode::Rename => {
                let mut reader = ByteReader::new(payload);
                let source = Principal::decode_from(&mut reader)?;
                let entry = E::decode(reader.rest())?;
                Ok(Self::Rename { source, entry })
            }
            OpCode::Modify => {
                let mut reader = ByteReader::new(payload);
                let mask = ModifyMask(reader.u32()?);
                let entry = E::decode(reader.rest())?;
                Ok(Self::Modify { mask, entry })
            }
            OpCode::Nop => match payload.len() {
                0 => Ok(Self::Nop {
                    kind: NopKind::Plain,
                }),
                4 => {
                    let raw = ByteReader::new(payload).u32()?;
                    let kind = NopKind::from_u32(raw).ok_or_else(|| {
                        LogError::invalid_payload(format!("unknown nop kind {raw}"))
                    })?;
                    Ok(Self::Nop { kind })
                }
                n if n as u64 == LOG_UBER_LEN => Ok(Self::Uber(UberPayload::decode(payload)?)),
                n => Err(LogError::invalid_payload(format!("nop payload of {n} bytes"))),
            },
        }
    }
}

/// Checks that a payload of `len` bytes fits the 32-bit length field.
fn payload_len(len: usize) -> LogResult<u32> {
    u32::try_from(len).map_err(|_| {
        LogError::invalid_argument(format!("record payload of {len} bytes exceeds the 32-bit length field"))
    })
}

fn frame(version: Version, timestamp: Timestamp, op: OpCode, len: u32, payload: &[u8]) -> Vec<u8> {
    let header = RecordHeader {
        version,
        timestamp,
        op,
        len,
    };
    let trailer = RecordTrailer { len, version };
    let mut out = Vec::with_capacity(payload.len() + super::LOG_WRAPPER_SZ as usize);
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    out.extend_from_slice(&trailer.encode());
    out
}

/// Frames `payload` as a complete record.
///
/// # Errors
///
/// Returns [`LogError::InvalidArgument`] if the payload is too long for
/// the record's length field.
pub fn encode_record(
    version: Version,
    timestamp: Timestamp,
    op: OpCode,
    payload: &[u8],
) -> LogResult<Vec<u8>> {
    let len = payload_len(payload.len())?;
    Ok(frame(version, timestamp, op, len, payload))
}

/// Encodes the uber record.
#[must_use]
pub fn encode_uber(timestamp: Timestamp, payload: &UberPayload) -> Vec<u8> {
    frame(Version::ZERO, timestamp, OpCode::Nop, LOG_UBER_LEN as u32, &payload.encode())
}
