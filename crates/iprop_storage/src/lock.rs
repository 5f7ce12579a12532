//! Advisory lock modes.

use std::fmt;

/// The advisory lock a log file is opened under.
///
/// Only [`LockMode::Exclusive`] permits mutation; every other mode is
/// read-only. Concurrent readers take [`LockMode::Shared`], diagnostic tools
/// may use [`LockMode::Unlocked`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LockMode {
    /// No lock held. The file must already exist.
    Unlocked,
    /// Shared (reader) lock.
    Shared,
    /// Exclusive (writer) lock.
    #[default]
    Exclusive,
}

impl LockMode {
    /// Returns true if a session under this lock may not mutate the log.
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        !matches!(self, Self::Exclusive)
    }

    /// Returns true if opening under this lock creates a missing file.
    #[must_use]
    pub const fn creates_file(self) -> bool {
        !matches!(self, Self::Unlocked)
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlocked => write!(f, "unlocked"),
            Self::Shared => write!(f, "shared"),
            Self::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// A lock mode together with how contention is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRequest {
    /// The lock to take.
    pub mode: LockMode,
    /// Fail with [`crate::StorageError::Locked`] instead of waiting.
    pub nonblocking: bool,
}

impl LockRequest {
    /// A blocking request for `mode`.
    #[must_use]
    pub const fn blocking(mode: LockMode) -> Self {
        Self {
            mode,
            nonblocking: false,
        }
    }

    /// A non-blocking request for `mode`.
    #[must_use]
    pub const fn nonblocking(mode: LockMode) -> Self {
        Self {
            mode,
            nonblocking: true,
        }
    }
}

impl From<LockMode> for LockRequest {
    fn from(mode: LockMode) -> Self {
        Self::blocking(mode)
    }
}
