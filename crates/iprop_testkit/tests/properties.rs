//! Property tests over generated mutation sequences.

use iprop_core::{IpropLog, MemoryDatabase, Scope, Version};
use iprop_testkit::prelude::*;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn versions_are_consecutive_from_one(mutations in mutations_strategy(40)) {
        let fixture = TestLog::new();
        let mut log = fixture.open();
        let mut model = Model::new();
        let mut logged = 0u32;

        for mutation in &mutations {
            if mutation.apply(&mut log).unwrap() {
                logged += 1;
                model.apply(mutation);
            }
            prop_assert_eq!(log.version(), Version::new(logged));
        }

        let versions = record_versions(log.context_mut(), Scope::All).unwrap();
        prop_assert_eq!(versions, (1..=logged).collect::<Vec<_>>());
        prop_assert_eq!(fixture.db().principals(), model.principals());
        prop_assert_eq!(fixture.db().len(), model.entries().len());
        for expected in model.entries() {
            prop_assert_eq!(fixture.db().get(&expected.principal), Some(expected));
        }
    }

    #[test]
    fn shipping_the_log_reproduces_the_database(mutations in mutations_strategy(30)) {
        let master = TestLog::new();
        let replica = TestLog::new();
        let mut master_log = master.open();
        for mutation in &mutations {
            mutation.apply(&mut master_log).unwrap();
        }

        let batch = confirmed_records(master_log.context_mut()).unwrap();
        let mut replica_log = replica.open();
        replica_log.append_shipped(&batch).unwrap();

        prop_assert_eq!(replica_log.version(), master_log.version());
        prop_assert_eq!(replica.db().principals(), master.db().principals());
        for principal in master.db().principals() {
            prop_assert_eq!(replica.db().get(&principal), master.db().get(&principal));
        }
    }

    #[test]
    fn reopening_replays_nothing(mutations in mutations_strategy(30)) {
        let fixture = TestLog::new();
        let version = {
            let mut log = fixture.open();
            for mutation in &mutations {
                mutation.apply(&mut log).unwrap();
            }
            log.version()
        };

        let db = MemoryDatabase::new();
        let mut log = fixture.open_with(db.clone()).unwrap();
        prop_assert_eq!(log.version(), version);
        prop_assert!(db.applied().is_empty());
        prop_assert!(record_versions(log.context_mut(), Scope::UnconfirmedOnly).unwrap().is_empty());
    }

    #[test]
    fn truncation_keeps_a_suffix(count in 1u32..30, keep in 1usize..10) {
        let fixture = TestLog::new();
        let mut log = fixture.open();
        for i in 0..count {
            log.create(&entry(&format!("user{i}"))).unwrap();
        }

        log.truncate(keep, 0).unwrap();
        let kept = keep.min(count as usize) as u32;
        let versions = record_versions(log.context_mut(), Scope::All).unwrap();
        prop_assert_eq!(versions, (count - kept + 1..=count).collect::<Vec<_>>());

        drop(log);
        let reopened: IpropLog<MemoryDatabase> = fixture.open();
        prop_assert_eq!(reopened.version(), Version::new(count));
    }
}
