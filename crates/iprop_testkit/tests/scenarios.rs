//! End-to-end scenarios against on-disk logs.

use iprop_core::{
    IpropLog, LockMode, LogError, Marker, MemoryDatabase, ModifyMask, NopKind, OpCode, Scope,
    Version, LOG_UBER_SZ,
};
use iprop_testkit::prelude::*;

#[test]
fn create_then_modify_on_fresh_log() {
    let fixture = TestLog::new();
    {
        let mut log = fixture.open();
        log.create(&entry("alice")).unwrap();
        log.modify(&entry("alice").with_kvno(2), ModifyMask::KVNO).unwrap();
        assert_eq!(log.version(), Version::new(2));
    }

    let mut ctx = fixture.context(LockMode::Shared).unwrap();
    assert_eq!(ctx.read_marker(Marker::First).unwrap().0, Version::new(1));
    assert_eq!(ctx.read_marker(Marker::Last).unwrap().0, Version::new(2));
    assert_eq!(ctx.read_uber_payload().unwrap().last_version, Version::new(2));
    assert_eq!(record_ops(&mut ctx).unwrap(), vec![OpCode::Create, OpCode::Modify]);
    assert!(record_versions(&mut ctx, Scope::UnconfirmedOnly).unwrap().is_empty());
    assert_eq!(fixture.db().get(&principal("alice")).unwrap().kvno, 2);
}

#[test]
fn readers_see_only_confirmed_records() {
    let fixture = TestLog::new();
    {
        let mut log = fixture.open();
        log.create(&entry("alice")).unwrap();
    }
    fixture.append_unconfirmed(2, &create_op("bob"));

    let mut reader = fixture.open_shared();
    assert_eq!(reader.version(), Version::new(1));
    assert_eq!(reader.read_marker(Marker::Last).unwrap().0, Version::new(1));
    assert!(matches!(reader.create(&entry("carol")), Err(LogError::ReadOnly)));
    drop(reader);

    // The next writer replays the pending record.
    let log = fixture.open();
    assert_eq!(log.version(), Version::new(2));
    assert!(fixture.db().contains(&principal("bob")));
}

#[test]
fn replica_follows_master() {
    let master = TestLog::new();
    let replica = TestLog::new();

    let mut master_log = master.open();
    master_log.create(&entry("alice")).unwrap();
    master_log.create(&entry("bob")).unwrap();

    let mut replica_log = replica.open();
    let batch = confirmed_records(master_log.context_mut()).unwrap();
    assert_eq!(replica_log.append_shipped(&batch).unwrap(), 2);

    master_log.rename(&principal("bob"), &entry("robert")).unwrap();
    master_log.delete(&principal("alice")).unwrap();

    let mut next = Vec::new();
    master_log
        .for_each(
            iprop_core::Direction::Forward,
            Scope::ConfirmedOnly,
            |ctx, meta| {
                if meta.version() > Version::new(2) {
                    next.extend(ctx.read_record(meta)?);
                }
                Ok(iprop_core::IterControl::Continue)
            },
        )
        .unwrap();
    assert_eq!(replica_log.append_shipped(&next).unwrap(), 2);

    assert_eq!(replica_log.version(), master_log.version());
    assert_eq!(replica.db().principals(), master.db().principals());
    assert_eq!(replica.db().principals(), vec![principal("robert")]);
}

#[test]
fn out_of_sequence_batch_is_rejected() {
    let master = TestLog::new();
    let replica = TestLog::new();

    let mut master_log = master.open();
    for name in ["user1", "user2", "user3"] {
        master_log.create(&entry(name)).unwrap();
    }
    let batch = confirmed_records(master_log.context_mut()).unwrap();
    let second_onwards = &batch[batch.len() / 3..];

    let mut replica_log = replica.open();
    let size_before = replica.bytes().len();
    assert!(replica_log.append_shipped(second_onwards).unwrap_err().is_corrupt());
    assert!(replica_log.append_shipped(&batch[..batch.len() - 1]).unwrap_err().is_corrupt());
    assert_eq!(replica.bytes().len(), size_before);
    assert_eq!(replica_log.version(), Version::ZERO);
}

#[test]
fn truncate_keeps_newest_records() {
    let fixture = TestLog::new();
    let mut log = fixture.open();
    for i in 0..10 {
        log.create(&entry(&format!("user{i}"))).unwrap();
    }

    log.truncate(4, 0).unwrap();
    assert_eq!(log.read_marker(Marker::First).unwrap().0, Version::new(7));
    assert_eq!(log.read_marker(Marker::Last).unwrap().0, Version::new(10));

    log.create(&entry("late")).unwrap();
    assert_eq!(log.version(), Version::new(11));
    assert_eq!(
        record_versions(log.context_mut(), Scope::All).unwrap(),
        vec![7, 8, 9, 10, 11]
    );
}

#[test]
fn truncating_to_one_record_keeps_the_last() {
    let fixture = TestLog::new();
    let mut log = fixture.open();
    log.create(&entry("alice")).unwrap();
    log.modify(&entry("alice").with_kvno(2), ModifyMask::KVNO).unwrap();
    let last = log.read_marker(Marker::Last).unwrap();
    assert_eq!(last.0, Version::new(2));

    log.truncate(1, 0).unwrap();

    let first = log.read_marker(Marker::First).unwrap();
    assert_eq!(first, last);
    assert_eq!(log.read_marker(Marker::Last).unwrap(), last);
    assert_eq!(log.version(), Version::new(2));
    assert_eq!(record_versions(log.context_mut(), Scope::All).unwrap(), vec![2]);
}

#[test]
fn oversized_log_shrinks_on_open() {
    let fixture = TestLog::new();
    {
        let mut log = fixture.open();
        for _ in 0..100 {
            log.nop(NopKind::Close).unwrap();
        }
    }
    let grown = fixture.bytes().len() as u64;
    assert_eq!(grown, LOG_UBER_SZ + 100 * 28);

    let fixture = fixture.with_max_log_size(1000);
    let mut log = fixture.open();
    let size = fixture.bytes().len() as u64;
    assert!(size <= LOG_UBER_SZ + 250);
    assert_eq!(log.version(), Version::new(100));
    assert_eq!(log.read_marker(Marker::Last).unwrap().0, Version::new(100));
}

#[test]
fn interrupted_truncation_is_recovered() {
    let fixture = TestLog::new();
    {
        let mut log = fixture.open();
        log.create(&entry("alice")).unwrap();
        log.create(&entry("bob")).unwrap();
    }

    // Uber record with a zero confirmed offset, as left by a truncation
    // that crashed before patching it.
    let mut bytes = fixture.bytes();
    bytes[16..24].copy_from_slice(&0u64.to_be_bytes());
    fixture.write_bytes(&bytes);

    let mut reader = fixture.context(LockMode::Shared).unwrap();
    assert!(reader.read_marker(Marker::Last).unwrap_err().is_corrupt());
    drop(reader);

    let mut log = fixture.open();
    assert_eq!(log.version(), Version::ZERO);
    assert_eq!(fixture.bytes().len() as u64, LOG_UBER_SZ);
    log.create(&entry("carol")).unwrap();
    assert_eq!(log.version(), Version::new(1));
}

#[test]
fn null_log_still_updates_database() {
    let db = MemoryDatabase::new();
    let mut log = IpropLog::open(&iprop_core::LogConfig::new(), db.clone()).unwrap();
    assert!(log.context().is_null());

    log.create(&entry("alice")).unwrap();
    log.modify(&entry("alice").with_kvno(3), ModifyMask::KVNO).unwrap();
    assert_eq!(db.get(&principal("alice")).unwrap().kvno, 3);
    assert_eq!(log.version(), Version::ZERO);
    assert!(log.append_shipped(&[]).is_err());
}

#[test]
fn nop_records_carry_their_kind() {
    let fixture = TestLog::new();
    let mut log = fixture.open();
    log.nop(NopKind::Plain).unwrap();
    log.nop(NopKind::Truncate).unwrap();
    log.nop(NopKind::Close).unwrap();

    let mut kinds = Vec::new();
    log.for_each(
        iprop_core::Direction::Forward,
        Scope::All,
        |ctx, meta| {
            if !meta.is_uber() {
                let payload = ctx.read_payload(meta)?;
                let op = iprop_core::Operation::<iprop_core::SimpleEntry>::decode(meta.op(), &payload)?;
                kinds.push(op);
            }
            Ok(iprop_core::IterControl::Continue)
        },
    )
    .unwrap();

    let kinds: Vec<_> = kinds
        .into_iter()
        .map(|op| match op {
            iprop_core::Operation::Nop { kind } => kind,
            other => panic!("unexpected record {other:?}"),
        })
        .collect();
    assert_eq!(kinds, vec![NopKind::Plain, NopKind::Truncate, NopKind::Close]);
}
