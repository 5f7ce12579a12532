//! Property-based test generators using proptest.
//!
//! Provides strategies for principals, entries and sequences of log
//! mutations, plus a reference model to check a database against.

use crate::fixtures::TEST_REALM;
use iprop_core::{
    IpropLog, LogError, LogResult, ModifyMask, NopKind, Principal, PrincipalDatabase, SimpleEntry,
};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for principal names from a small pool, so that generated
/// mutations collide often enough to exercise prechecks.
pub fn principal_strategy() -> impl Strategy<Value = Principal> {
    (
        prop::sample::select(vec!["alice", "bob", "carol", "dave", "erin"]),
        prop::option::of(prop::sample::select(vec!["admin", "host"])),
    )
        .prop_map(|(name, instance)| match instance {
            Some(instance) => Principal::new(TEST_REALM, [name, instance]),
            None => Principal::new(TEST_REALM, [name]),
        })
}

/// Strategy for entries with arbitrary attributes and key blobs.
pub fn entry_strategy() -> impl Strategy<Value = SimpleEntry> {
    (
        principal_strategy(),
        any::<u32>(),
        any::<u32>(),
        prop::option::of(any::<u32>()),
        prop::collection::vec(prop::collection::vec(any::<u8>(), 0..32), 0..3),
    )
        .prop_map(|(principal, kvno, attributes, max_life, keys)| {
            let mut entry = SimpleEntry::new(principal).with_kvno(kvno);
            entry.attributes = attributes;
            entry.max_life = max_life;
            entry.keys = keys;
            entry
        })
}

/// A mutation a test applies through [`IpropLog`].
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Create an entry.
    Create(SimpleEntry),
    /// Delete a principal.
    Delete(Principal),
    /// Rename a principal to the entry's name.
    Rename(Principal, SimpleEntry),
    /// Modify the masked attributes of an entry.
    Modify(SimpleEntry, ModifyMask),
    /// Log a nop.
    Nop(NopKind),
}

fn mask_strategy() -> impl Strategy<Value = ModifyMask> {
    prop::sample::select(vec![
        ModifyMask::KVNO,
        ModifyMask::ATTRIBUTES,
        ModifyMask::MAX_LIFE,
        ModifyMask::KVNO | ModifyMask::KEY_DATA,
        ModifyMask::ATTRIBUTES | ModifyMask::MAX_LIFE,
    ])
}

/// Strategy for a single mutation.
pub fn operation_strategy() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        4 => entry_strategy().prop_map(Mutation::Create),
        2 => principal_strategy().prop_map(Mutation::Delete),
        1 => (principal_strategy(), entry_strategy())
            .prop_map(|(source, entry)| Mutation::Rename(source, entry)),
        2 => (entry_strategy(), mask_strategy())
            .prop_map(|(entry, mask)| Mutation::Modify(entry, mask)),
        1 => prop::sample::select(vec![NopKind::Plain, NopKind::Close]).prop_map(Mutation::Nop),
    ]
}

/// Strategy for a sequence of mutations.
pub fn mutations_strategy(max_len: usize) -> impl Strategy<Value = Vec<Mutation>> {
    prop::collection::vec(operation_strategy(), 1..max_len)
}

impl Mutation {
    /// Applies the mutation through `log`.
    ///
    /// Returns `Ok(true)` if a record was logged and `Ok(false)` if the
    /// database's precheck refused it.
    ///
    /// # Errors
    ///
    /// Returns any other error.
    pub fn apply<D>(&self, log: &mut IpropLog<D>) -> LogResult<bool>
    where
        D: PrincipalDatabase<Entry = SimpleEntry>,
    {
        let result = match self {
            Self::Create(entry) => log.create(entry),
            Self::Delete(principal) => log.delete(principal),
            Self::Rename(source, entry) => {
                if *source == entry.principal {
                    return Ok(false);
                }
                log.rename(source, entry)
            }
            Self::Modify(entry, mask) => log.modify(entry, *mask),
            Self::Nop(kind) => log.nop(*kind),
        };
        match result {
            Ok(()) => Ok(true),
            Err(LogError::EntryExists { .. } | LogError::EntryNotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// A reference model of the database: what the entries must look like
/// after a sequence of successful mutations.
#[derive(Debug, Clone, Default)]
pub struct Model {
    entries: BTreeMap<Principal, SimpleEntry>,
}

impl Model {
    /// Creates an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a mutation the log accepted.
    pub fn apply(&mut self, mutation: &Mutation) {
        use iprop_core::LogEntry;

        match mutation {
            Mutation::Create(entry) => {
                self.entries.insert(entry.principal.clone(), entry.clone());
            }
            Mutation::Delete(principal) => {
                self.entries.remove(principal);
            }
            Mutation::Rename(source, entry) => {
                self.entries.remove(source);
                self.entries.insert(entry.principal.clone(), entry.clone());
            }
            Mutation::Modify(entry, mask) => {
                if let Some(current) = self.entries.get_mut(&entry.principal) {
                    current.apply_modifications(entry, *mask);
                }
            }
            Mutation::Nop(_) => {}
        }
    }

    /// The modelled entries, ordered by principal.
    #[must_use]
    pub fn entries(&self) -> Vec<SimpleEntry> {
        self.entries.values().cloned().collect()
    }

    /// The modelled principals, ordered.
    #[must_use]
    pub fn principals(&self) -> Vec<Principal> {
        self.entries.keys().cloned().collect()
    }
}
