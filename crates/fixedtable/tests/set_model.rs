use fixedtable::FixedSet;
use proptest::prelude::*;
use std::collections::HashSet;

// Model random insert/erase sequences against std's HashSet: after every
// prefix, membership must reflect exactly the net effect of the operations
// applied to each key.
proptest! {
    #[test]
    fn prop_membership_matches_model(ops in proptest::collection::vec((any::<bool>(), 0u64..50), 1..400)) {
        let mut table: FixedSet<u64> = FixedSet::new();
        let mut model: HashSet<u64> = HashSet::new();

        for (is_insert, key) in ops {
            if is_insert {
                let added = table.insert(key).unwrap();
                prop_assert_eq!(added, model.insert(key));
            } else {
                let removed = table.erase(&key).unwrap();
                prop_assert_eq!(removed, model.remove(&key));
            }
            prop_assert_eq!(table.contains(&key), model.contains(&key));
            prop_assert_eq!(table.len(), model.len());
        }

        for key in 0u64..50 {
            prop_assert_eq!(table.contains(&key), model.contains(&key));
        }
    }

    #[test]
    fn prop_round_trip_preserves_contents(keys in proptest::collection::hash_set(0u64..10_000, 0..200)) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("set.bin");

        let mut table: FixedSet<u64> = FixedSet::new();
        for &k in &keys {
            table.insert(k).unwrap();
        }
        table.write(&path).unwrap();

        let mapped: FixedSet<u64> = FixedSet::open(&path).unwrap();
        prop_assert_eq!(mapped.len(), keys.len());
        for &k in &keys {
            prop_assert!(mapped.contains(&k));
        }
        let collected: HashSet<u64> = mapped.iter().collect();
        prop_assert_eq!(collected, keys);
    }

    #[test]
    fn prop_reserve_never_loses_keys(keys in proptest::collection::hash_set(0u64..1_000, 1..100), target in 0usize..2_000) {
        let mut table: FixedSet<u64> = FixedSet::new();
        for &k in &keys {
            table.insert(k).unwrap();
        }
        table.reserve(target).unwrap();
        prop_assert_eq!(table.len(), keys.len());
        for &k in &keys {
            prop_assert!(table.contains(&k));
        }
    }
}
