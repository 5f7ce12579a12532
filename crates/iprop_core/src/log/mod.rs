//! The iprop transaction log.
//!
//! The log is an append-only file of framed records. The first record is
//! the *uber record*, a nop at offset 0 whose payload points just past the
//! last confirmed record and caches that record's version and timestamp:
//!
//! ```text
//! offset 0                40                          next_offset        EOF
//! [ uber (nop, v0, 16B) ] [ confirmed records ... ] [ unconfirmed ... ]
//! ```
//!
//! A record is *confirmed* once the database reflects it and the uber
//! record has been advanced past it. Appending writes and syncs a record,
//! then replays it into the database and confirms it; on open, any
//! unconfirmed records left by a crash are replayed.
//!
//! Logs written before the uber record existed ("old format") are read by
//! physical end and upgraded on open.

mod append;
mod context;
mod engine;
mod flush;
mod iter;
mod marker;
mod navigator;
pub mod record;
mod recovery;
mod truncate;

pub use context::LogContext;
pub use engine::IpropLog;
pub use iter::{Direction, IterControl, IterSummary, RecordMeta, Scope};
pub use marker::Marker;
pub use record::{NopKind, OpCode, Operation, RecordHeader, RecordTrailer, UberPayload};
pub use recovery::RecoverMode;

/// Size of a record header.
pub const LOG_HEADER_SZ: u64 = 16;

/// Size of a record trailer.
pub const LOG_TRAILER_SZ: u64 = 8;

/// Header plus trailer.
pub const LOG_WRAPPER_SZ: u64 = LOG_HEADER_SZ + LOG_TRAILER_SZ;

/// Payload length of the uber record.
pub const LOG_UBER_LEN: u64 = 16;

/// Total size of the uber record; the first real record starts here.
pub const LOG_UBER_SZ: u64 = LOG_WRAPPER_SZ + LOG_UBER_LEN;
