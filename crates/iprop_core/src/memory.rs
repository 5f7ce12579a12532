//! In-memory principal database.
//!
//! [`MemoryDatabase`] and [`SimpleEntry`] are complete implementations of
//! the collaborator traits, used by the test suites and the operator tool.
//! Clones of a `MemoryDatabase` share the same entries, so a test can hand
//! one clone to a log and inspect the other.

use crate::bytes::{put_data, put_optional_u32, put_u32, ByteReader};
use crate::database::{LogEntry, ModifyMask, PrincipalDatabase, StoreFlags};
use crate::error::{LogError, LogResult};
use crate::principal::Principal;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Who changed an entry last, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    /// Seconds since the Unix epoch.
    pub time: u32,
    /// The administrator principal.
    pub by: Principal,
}

/// A principal entry with the attributes a modify record can address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleEntry {
    /// Principal name.
    pub principal: Principal,
    /// Key version number.
    pub kvno: u32,
    /// Attribute flags.
    pub attributes: u32,
    /// Maximum ticket life in seconds.
    pub max_life: Option<u32>,
    /// Maximum renewable life in seconds.
    pub max_renew: Option<u32>,
    /// Principal expiration time.
    pub valid_end: Option<u32>,
    /// Password expiration time.
    pub pw_end: Option<u32>,
    /// Last modification.
    pub modified: Option<Modification>,
    /// Opaque key blobs.
    pub keys: Vec<Vec<u8>>,
    /// Opaque tagged extension blobs.
    pub extensions: Vec<Vec<u8>>,
}

impl SimpleEntry {
    /// Creates an entry with kvno 1 and no optional attributes.
    #[must_use]
    pub fn new(principal: Principal) -> Self {
        Self {
            principal,
            kvno: 1,
            attributes: 0,
            max_life: None,
            max_renew: None,
            valid_end: None,
            pw_end: None,
            modified: None,
            keys: Vec::new(),
            extensions: Vec::new(),
        }
    }

    /// Sets the key version number.
    #[must_use]
    pub fn with_kvno(mut self, kvno: u32) -> Self {
        self.kvno = kvno;
        self
    }

    /// Sets the maximum ticket life.
    #[must_use]
    pub fn with_max_life(mut self, secs: u32) -> Self {
        self.max_life = Some(secs);
        self
    }

    /// Adds a key blob.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.keys.push(key.into());
        self
    }
}

fn put_blobs(buf: &mut Vec<u8>, blobs: &[Vec<u8>]) {
    put_u32(buf, blobs.len() as u32);
    for blob in blobs {
        put_data(buf, blob);
    }
}

fn read_blobs(reader: &mut ByteReader<'_>) -> LogResult<Vec<Vec<u8>>> {
    let count = reader.u32()? as usize;
    if count > reader.remaining() / 4 {
        return Err(LogError::invalid_payload(format!("entry claims {count} blobs")));
    }
    (0..count).map(|_| Ok(reader.data()?.to_vec())).collect()
}

impl LogEntry for SimpleEntry {
    fn principal(&self) -> &Principal {
        &self.principal
    }

    fn encode(&self) -> LogResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.principal.encode_into(&mut buf);
        put_u32(&mut buf, self.kvno);
        put_u32(&mut buf, self.attributes);
        put_optional_u32(&mut buf, self.max_life);
        put_optional_u32(&mut buf, self.max_renew);
        put_optional_u32(&mut buf, self.valid_end);
        put_optional_u32(&mut buf, self.pw_end);
        match &self.modified {
            Some(m) => {
                put_u32(&mut buf, 1);
                put_u32(&mut buf, m.time);
                m.by.encode_into(&mut buf);
            }
            None => put_u32(&mut buf, 0),
        }
        put_blobs(&mut buf, &self.keys);
        put_blobs(&mut buf, &self.extensions);
        Ok(buf)
    }

    fn decode(bytes: &[u8]) -> LogResult<Self> {
        let mut reader = ByteReader::new(bytes);
        let principal = Principal::decode_from(&mut reader)?;
        let kvno = reader.u32()?;
        let attributes = reader.u32()?;
        let max_life = reader.optional_u32()?;
        let max_renew = reader.optional_u32()?;
        let valid_end = reader.optional_u32()?;
        let pw_end = reader.optional_u32()?;
        let modified = match reader.u32()? {
            0 => None,
            1 => {
                let time = reader.u32()?;
                let by = Principal::decode_from(&mut reader)?;
                Some(Modification { time, by })
            }
            other => {
                return Err(LogError::invalid_payload(format!(
                    "invalid modification flag {other}"
                )))
            }
        };
        let keys = read_blobs(&mut reader)?;
        let extensions = read_blobs(&mut reader)?;
        reader.finish()?;
        Ok(Self {
            principal,
            kvno,
            attributes,
            max_life,
            max_renew,
            valid_end,
            pw_end,
            modified,
            keys,
            extensions,
        })
    }

    fn apply_modifications(&mut self, update: &Self, mask: ModifyMask) {
        let mut handled = ModifyMask::NONE;

        if mask.contains(ModifyMask::PRINC_EXPIRE_TIME) {
            self.valid_end = update.valid_end;
            handled |= ModifyMask::PRINC_EXPIRE_TIME;
        }
        if mask.contains(ModifyMask::PW_EXPIRATION) {
            self.pw_end = update.pw_end;
            handled |= ModifyMask::PW_EXPIRATION;
        }
        if mask.contains(ModifyMask::ATTRIBUTES) {
            self.attributes = update.attributes;
            handled |= ModifyMask::ATTRIBUTES;
        }
        if mask.contains(ModifyMask::MAX_LIFE) {
            self.max_life = update.max_life;
            handled |= ModifyMask::MAX_LIFE;
        }
        if mask.intersects(ModifyMask::MOD_NAME | ModifyMask::MOD_TIME) {
            self.modified = update.modified.clone();
            handled |= ModifyMask::MOD_NAME | ModifyMask::MOD_TIME;
        }
        if mask.contains(ModifyMask::KVNO) {
            self.kvno = update.kvno;
            handled |= ModifyMask::KVNO;
        }
        if mask.contains(ModifyMask::MAX_RLIFE) {
            self.max_renew = update.max_renew;
            handled |= ModifyMask::MAX_RLIFE;
        }
        if mask.contains(ModifyMask::KEY_DATA) {
            self.keys = update.keys.clone();
            handled |= ModifyMask::KEY_DATA;
        }
        // New keys come with their salt and alias extensions.
        if mask.intersects(ModifyMask::KEY_DATA | ModifyMask::TL_DATA) {
            self.extensions = update.extensions.clone();
            handled |= ModifyMask::TL_DATA;
        }

        let ignored = mask.without(handled);
        if !ignored.is_empty() {
            tracing::warn!(
                principal = %self.principal,
                mask = %ignored,
                "modify mask bits not implemented; ignoring"
            );
        }
    }
}

/// A change applied to a [`MemoryDatabase`] (prechecks excluded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// An entry was stored.
    Stored(Principal),
    /// An entry was removed.
    Removed(Principal),
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<Principal, SimpleEntry>,
    applied: Vec<Applied>,
}

/// A thread-safe in-memory principal database.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<Mutex<Inner>>,
    shared_directory: bool,
}

impl MemoryDatabase {
    /// Creates an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the database as living in a directory shared with the writer.
    #[must_use]
    pub fn shared_directory(mut self, shared: bool) -> Self {
        self.shared_directory = shared;
        self
    }

    /// Returns the entry for `principal`, if any.
    #[must_use]
    pub fn get(&self, principal: &Principal) -> Option<SimpleEntry> {
        self.inner.lock().entries.get(principal).cloned()
    }

    /// Returns true if `principal` exists.
    #[must_use]
    pub fn contains(&self, principal: &Principal) -> bool {
        self.inner.lock().entries.contains_key(principal)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if the database holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Returns every stored principal in order.
    #[must_use]
    pub fn principals(&self) -> Vec<Principal> {
        self.inner.lock().entries.keys().cloned().collect()
    }

    /// Returns the changes applied so far, oldest first.
    #[must_use]
    pub fn applied(&self) -> Vec<Applied> {
        self.inner.lock().applied.clone()
    }
}

impl PrincipalDatabase for MemoryDatabase {
    type Entry = SimpleEntry;

    fn store(&mut self, entry: &SimpleEntry, flags: StoreFlags) -> LogResult<()> {
        let mut inner = self.inner.lock();
        if !flags.replace && inner.entries.contains_key(&entry.principal) {
            return Err(LogError::EntryExists {
                principal: entry.principal.to_string(),
            });
        }
        if flags.precheck {
            return Ok(());
        }
        inner
            .entries
            .insert(entry.principal.clone(), entry.clone());
        inner.applied.push(Applied::Stored(entry.principal.clone()));
        Ok(())
    }

    fn remove(&mut self, principal: &Principal, flags: StoreFlags) -> LogResult<()> {
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(principal) {
            return Err(LogError::EntryNotFound {
                principal: principal.to_string(),
            });
        }
        if flags.precheck {
            return Ok(());
        }
        inner.entries.remove(principal);
        inner.applied.push(Applied::Removed(principal.clone()));
        Ok(())
    }

    fn fetch(&mut self, principal: &Principal) -> LogResult<SimpleEntry> {
        self.get(principal).ok_or_else(|| LogError::EntryNotFound {
            principal: principal.to_string(),
        })
    }

    fn is_shared_directory(&self) -> bool {
        self.shared_directory
    }
}
