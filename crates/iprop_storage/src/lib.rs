//! # iprop storage
//!
//! Byte-store backends for the iprop transaction log.
//!
//! Backends are **opaque byte stores**: they know nothing about log records,
//! the uber record or versions. The log engine in `iprop_core` owns all
//! format interpretation.
//!
//! ## Design Principles
//!
//! - Backends offer positional reads, appends, one positional overwrite,
//!   truncation and durability barriers
//! - A backend reports the lock it was opened under; the engine derives
//!   read-only mode from it
//! - Must be `Send + Sync`
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral logs
//! - [`FileBackend`] - For on-disk logs, guarded by an advisory whole-file lock
//!
//! ## Example
//!
//! ```rust
//! use iprop_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! backend.write_at(0, b"H").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"Hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod lock;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use lock::{LockMode, LockRequest};
pub use memory::InMemoryBackend;
