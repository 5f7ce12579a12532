//! # iprop core
//!
//! The incremental-propagation transaction log of a Kerberos principal
//! database.
//!
//! This crate provides:
//! - The on-disk record format and its codecs
//! - Navigation over record boundaries in both directions
//! - The uber record: confirmed-end marker, cached version and timestamp
//! - Durable appends with replay-and-confirm, and crash recovery
//! - Filtered iteration with torn-tail repair
//! - Truncation to the newest records
//! - A replication notifier announcing new versions
//!
//! The principal database itself is a collaborator behind the
//! [`PrincipalDatabase`] and [`LogEntry`] traits; [`MemoryDatabase`] is a
//! complete in-memory implementation.
//!
//! ## Example
//!
//! ```rust
//! use iprop_core::{IpropLog, LogConfig, Marker, MemoryDatabase, ModifyMask, Principal, SimpleEntry};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let config = LogConfig::new().log_file(dir.path().join("log"));
//! let db = MemoryDatabase::new();
//! let alice = Principal::new("EXAMPLE.COM", ["alice"]);
//!
//! {
//!     let mut log = IpropLog::open(&config, db.clone()).unwrap();
//!     log.create(&SimpleEntry::new(alice.clone())).unwrap();
//!     log.modify(&SimpleEntry::new(alice.clone()).with_kvno(2), ModifyMask::KVNO).unwrap();
//! }
//!
//! let mut log = IpropLog::open_shared(&config, MemoryDatabase::new()).unwrap();
//! assert_eq!(log.read_marker(Marker::Last).unwrap().0.as_u32(), 2);
//! assert_eq!(db.get(&alice).unwrap().kvno, 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod bytes;
mod config;
mod database;
mod error;
pub mod log;
mod memory;
mod principal;
pub mod signal;
mod types;

pub use config::{
    effective_max_log_size, LogConfig, LogTarget, SignalConfig, DEFAULT_MAX_LOG_SIZE,
    DEFAULT_SIGNAL_PORT, LOG_FILE_NAME, SIGNAL_SOCKET_NAME,
};
pub use database::{LogEntry, ModifyMask, PrincipalDatabase, StoreFlags};
pub use error::{LogError, LogResult};
pub use log::{
    Direction, IpropLog, IterControl, IterSummary, LogContext, Marker, NopKind, OpCode, Operation,
    RecordHeader, RecordMeta, RecordTrailer, RecoverMode, Scope, UberPayload, LOG_HEADER_SZ,
    LOG_TRAILER_SZ, LOG_UBER_LEN, LOG_UBER_SZ, LOG_WRAPPER_SZ,
};
pub use memory::{Applied, MemoryDatabase, Modification, SimpleEntry};
pub use principal::{Principal, NT_PRINCIPAL};
pub use signal::{notifier_from_config, NullNotifier, ReplicationNotifier, TcpNotifier};
#[cfg(unix)]
pub use signal::UnixSocketNotifier;
pub use types::{Timestamp, Version};

pub use iprop_storage::{LockMode, LockRequest};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
