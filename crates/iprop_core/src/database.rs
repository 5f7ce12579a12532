//! Collaborator traits for the principal database the log feeds.
//!
//! The log engine never interprets entries beyond their principal. It
//! encodes them into record payloads on append and hands them back to the
//! database on replay.

use crate::error::LogResult;
use crate::principal::Principal;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Flags for [`PrincipalDatabase::store`] and [`PrincipalDatabase::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreFlags {
    /// Only check that the operation would succeed; change nothing.
    pub precheck: bool,
    /// Overwrite an existing entry instead of failing with `EntryExists`.
    pub replace: bool,
}

impl StoreFlags {
    /// Plain store or remove.
    pub const NONE: Self = Self {
        precheck: false,
        replace: false,
    };

    /// Dry-run check.
    pub const PRECHECK: Self = Self {
        precheck: true,
        replace: false,
    };

    /// Store over an existing entry.
    pub const REPLACE: Self = Self {
        precheck: false,
        replace: true,
    };

    /// Returns these flags with the precheck bit set.
    #[must_use]
    pub const fn with_precheck(mut self) -> Self {
        self.precheck = true;
        self
    }
}

/// Attribute selection for a modify record.
///
/// Bit values follow the kadm5 administration protocol masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ModifyMask(pub u32);

impl ModifyMask {
    /// Principal expiration time.
    pub const PRINC_EXPIRE_TIME: Self = Self(0x0000_0001);
    /// Password expiration time.
    pub const PW_EXPIRATION: Self = Self(0x0000_0002);
    /// Last password change.
    pub const LAST_PWD_CHANGE: Self = Self(0x0000_0004);
    /// Principal attribute flags.
    pub const ATTRIBUTES: Self = Self(0x0000_0008);
    /// Maximum ticket life.
    pub const MAX_LIFE: Self = Self(0x0000_0010);
    /// Modification time.
    pub const MOD_TIME: Self = Self(0x0000_0020);
    /// Modifying principal.
    pub const MOD_NAME: Self = Self(0x0000_0040);
    /// Key version number.
    pub const KVNO: Self = Self(0x0000_0100);
    /// Master key version number.
    pub const MKVNO: Self = Self(0x0000_0200);
    /// Auxiliary attributes.
    pub const AUX_ATTRIBUTES: Self = Self(0x0000_0400);
    /// Password policy.
    pub const POLICY: Self = Self(0x0000_0800);
    /// Clear the password policy.
    pub const POLICY_CLR: Self = Self(0x0000_1000);
    /// Maximum renewable life.
    pub const MAX_RLIFE: Self = Self(0x0000_2000);
    /// Last successful authentication.
    pub const LAST_SUCCESS: Self = Self(0x0000_4000);
    /// Last failed authentication.
    pub const LAST_FAILED: Self = Self(0x0000_8000);
    /// Failed authentication count.
    pub const FAIL_AUTH_COUNT: Self = Self(0x0001_0000);
    /// Key material.
    pub const KEY_DATA: Self = Self(0x0002_0000);
    /// Tagged extension data.
    pub const TL_DATA: Self = Self(0x0004_0000);

    /// The empty mask.
    pub const NONE: Self = Self(0);

    /// Returns true if every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if any bit of `other` is set in `self`.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns the bits of `self` not present in `other`.
    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Returns true if no bit is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ModifyMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ModifyMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ModifyMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A principal database entry as carried in log payloads.
pub trait LogEntry: Clone + Sized {
    /// The principal this entry describes.
    fn principal(&self) -> &Principal;

    /// Encodes the entry for a record payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be encoded.
    fn encode(&self) -> LogResult<Vec<u8>>;

    /// Decodes an entry from a record payload.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LogError::InvalidPayload`] on malformed bytes.
    fn decode(bytes: &[u8]) -> LogResult<Self>;

    /// Copies the attributes selected by `mask` from `update` into `self`.
    fn apply_modifications(&mut self, update: &Self, mask: ModifyMask);
}

/// The principal database the log describes.
///
/// Implementations report an existing principal on a non-replacing store as
/// [`crate::LogError::EntryExists`] and a missing one as
/// [`crate::LogError::EntryNotFound`]; replay treats exactly those two as
/// benign.
pub trait PrincipalDatabase {
    /// Entry type stored in this database.
    type Entry: LogEntry;

    /// Stores `entry`, or with `flags.precheck` only checks that the store
    /// would succeed.
    ///
    /// # Errors
    ///
    /// Returns `EntryExists` if the principal exists and `flags.replace` is
    /// unset, or any database failure.
    fn store(&mut self, entry: &Self::Entry, flags: StoreFlags) -> LogResult<()>;

    /// Removes `principal`, or with `flags.precheck` only checks that the
    /// removal would succeed.
    ///
    /// # Errors
    ///
    /// Returns `EntryNotFound` if the principal is absent, or any database
    /// failure.
    fn remove(&mut self, principal: &Principal, flags: StoreFlags) -> LogResult<()>;

    /// Fetches the entry for `principal`.
    ///
    /// # Errors
    ///
    /// Returns `EntryNotFound` if the principal is absent.
    fn fetch(&mut self, principal: &Principal) -> LogResult<Self::Entry>;

    /// Returns true if the database lives in a directory shared with the
    /// writer, which has already applied every logged change.
    fn is_shared_directory(&self) -> bool {
        false
    }
}

impl<D: PrincipalDatabase + ?Sized> PrincipalDatabase for &mut D {
    type Entry = D::Entry;

    fn store(&mut self, entry: &Self::Entry, flags: StoreFlags) -> LogResult<()> {
        (**self).store(entry, flags)
    }

    fn remove(&mut self, principal: &Principal, flags: StoreFlags) -> LogResult<()> {
        (**self).remove(principal, flags)
    }

    fn fetch(&mut self, principal: &Principal) -> LogResult<Self::Entry> {
        (**self).fetch(principal)
    }

    fn is_shared_directory(&self) -> bool {
        (**self).is_shared_directory()
    }
}
