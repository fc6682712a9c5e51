use {
  jprof::IdentityTable,
  proptest::prelude::*,
  std::collections::HashMap,
};

#[derive(Debug, Clone)]
enum TableOp {
  Insert(u64, u32),
  Remove(u64),
  DeleteArena(u64),
  Rehash(usize),
  Shrink,
}

/// Small key space so inserts and removes collide on the same probe chains.
fn table_ops() -> impl Strategy<Value = Vec<TableOp>> {
  prop::collection::vec(
    prop_oneof![
      4 => (1u64..200, any::<u32>())
        .prop_map(|(key, value)| TableOp::Insert(key, value)),
      3 => (1u64..200).prop_map(TableOp::Remove),
      1 => (0u64..4).prop_map(TableOp::DeleteArena),
      1 => (0usize..512).prop_map(TableOp::Rehash),
      1 => Just(TableOp::Shrink),
    ],
    0..400,
  )
}

fn live_pairs(table: &IdentityTable<u32>) -> HashMap<u64, u32> {
  table.iter().map(|entry| (entry.key, entry.value)).collect()
}

proptest! {
  #[test]
  fn prop_find_follows_last_write(ops in table_ops()) {
    let mut table = IdentityTable::new("prop");
    let mut model: HashMap<u64, (u32, u64)> = HashMap::new();

    for op in ops {
      match op {
        TableOp::Insert(key, value) => {
          let arena = key % 4;
          table.insert(key, value, arena, 0, 1).unwrap();
          model.insert(key, (value, arena));
          prop_assert_eq!(table.find(key), Some(&value));
        }
        TableOp::Remove(key) => {
          let removed = table.remove(key).map(|entry| entry.value);
          prop_assert_eq!(removed, model.remove(&key).map(|(value, _)| value));
          prop_assert_eq!(table.find(key), None);
        }
        TableOp::DeleteArena(arena) => {
          let mut removed: Vec<u64> = table
            .delete_arena(arena)
            .into_iter()
            .map(|entry| entry.key)
            .collect();
          removed.sort_unstable();

          let mut expected: Vec<u64> = model
            .iter()
            .filter(|(_, (_, tag))| *tag == arena)
            .map(|(key, _)| *key)
            .collect();
          expected.sort_unstable();
          model.retain(|_, (_, tag)| *tag != arena);

          prop_assert_eq!(removed, expected);
        }
        TableOp::Rehash(capacity) => {
          prop_assert!(table.rehash(capacity));
        }
        TableOp::Shrink => table.check_size(),
      }
    }

    for (key, (value, _)) in &model {
      prop_assert_eq!(table.find(*key), Some(value));
    }

    prop_assert!(!table.is_corrupted());
  }

  #[test]
  fn prop_len_counts_live_slots(ops in table_ops()) {
    let mut table = IdentityTable::new("prop");

    for op in ops {
      match op {
        TableOp::Insert(key, value) => {
          table.insert(key, value, key % 4, 0, 1 + value % 8).unwrap();
        }
        TableOp::Remove(key) => {
          table.remove(key);
        }
        TableOp::DeleteArena(arena) => {
          table.delete_arena(arena);
        }
        TableOp::Rehash(capacity) => {
          table.rehash(capacity);
        }
        TableOp::Shrink => table.check_size(),
      }

      let (count, volume) = table.audit();
      prop_assert_eq!(table.len(), count);
      prop_assert_eq!(table.volume(), volume);
      prop_assert!(table.len() + table.tombstones() <= table.capacity());
    }
  }

  #[test]
  fn prop_rehash_preserves_content(
    entries in prop::collection::hash_map(1u64..10_000, any::<u32>(), 0..300),
    removed in prop::collection::vec(1u64..10_000, 0..100),
    headroom in 0usize..1024,
  ) {
    let mut table = IdentityTable::new("prop");

    for (&key, &value) in &entries {
      table.insert(key, value, 0, 0, 1).unwrap();
    }

    for key in removed {
      table.remove(key);
    }

    let before = live_pairs(&table);
    prop_assert!(table.rehash(table.len() + headroom));
    prop_assert_eq!(live_pairs(&table), before);
    prop_assert_eq!(table.tombstones(), 0);
  }
}

#[test]
fn removal_inside_a_long_chain_keeps_later_keys_reachable() {
  let mut table = IdentityTable::with_capacity("chain", 64);

  // Keys sharing a home slot land on one probe chain.
  let keys: Vec<u64> = (1..=20).map(|n| n * 64).collect();

  for &key in &keys {
    table.insert(key, key, 0, 0, 1).unwrap();
  }

  for &key in keys.iter().step_by(2) {
    assert!(table.remove(key).is_some());
  }

  for &key in keys.iter().skip(1).step_by(2) {
    assert_eq!(table.find(key), Some(&key));
  }

  assert_eq!(table.len(), keys.len() / 2);
}
