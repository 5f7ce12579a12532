//! # iprop testkit
//!
//! Test utilities for the iprop transaction log.
//!
//! This crate provides:
//! - Temporary log fixtures and entry helpers
//! - Fault injection: a storage backend that tears writes and fails
//!   syncs, and a database that fails the next store or remove
//! - Property-based generators for principals, entries and mutations
//!
//! ## Usage
//!
//! ```rust
//! use iprop_testkit::prelude::*;
//!
//! let fixture = TestLog::new();
//! let mut log = fixture.open();
//! log.create(&entry("alice")).unwrap();
//! assert_eq!(log.version().as_u32(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
