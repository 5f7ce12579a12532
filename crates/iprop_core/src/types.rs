//! Core type definitions for the iprop log.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A log record version.
///
/// Versions of non-uber records form a strictly increasing sequence with
/// step 1. Version 0 is reserved for the uber record and for an empty log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version(pub u32);

impl Version {
    /// The version of an empty log.
    pub const ZERO: Self = Self(0);

    /// Creates a new version.
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(v)
    }

    /// Returns the raw version value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the version the next appended record must carry.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wall-clock seconds since the Unix epoch, as stored in record headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub u32);

impl Timestamp {
    /// Creates a timestamp from raw seconds.
    #[must_use]
    pub const fn new(secs: u32) -> Self {
        Self(secs)
    }

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self(secs as u32)
    }

    /// Returns the raw seconds value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
