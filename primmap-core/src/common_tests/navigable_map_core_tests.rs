//! Single-threaded and light concurrent tests for `SkipListMap`.
//!
//! Functions taking a map expect it empty and in natural order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use crate::config::MapConfig;
use crate::data_structures::{Entry, KeyComparator, SkipListMap};
use crate::error::MapError;
use crate::guard::Guard;

fn s(value: &str) -> String {
    value.to_string()
}

fn keys_of<G: Guard>(map: &SkipListMap<i64, String, G>) -> Vec<i64> {
    map.keys().collect()
}

/// Unordered inserts come back sorted
pub fn test_sorted_insertion<G: Guard>(map: &SkipListMap<i64, String, G>) {
    for k in [5, 1, 3, 2, 4] {
        assert_eq!(map.put(k, k.to_string()), None);
    }

    assert_eq!(map.first_key(), Ok(1));
    assert_eq!(map.last_key(), Ok(5));
    assert_eq!(keys_of(map), vec![1, 2, 3, 4, 5]);
    assert_eq!(map.len(), 5);

    let entries: Vec<Entry<i64, String>> = map.iter().collect();
    assert_eq!(entries[0], Entry::new(1, s("1")));
    assert_eq!(entries[4], Entry::new(5, s("5")));
}

/// `put` on an existing key replaces the value and returns the old one
pub fn test_overwrite<G: Guard>(map: &SkipListMap<i64, String, G>) {
    assert_eq!(map.put(10, s("a")), None);
    assert_eq!(map.put(10, s("b")), Some(s("a")));
    assert_eq!(map.get(10), Some(s("b")));
    assert_eq!(map.len(), 1);
}

/// `put_if_absent` never replaces
pub fn test_put_if_absent<G: Guard>(map: &SkipListMap<i64, String, G>) {
    assert_eq!(map.put_if_absent(7, s("x")), None);
    assert_eq!(map.put_if_absent(7, s("y")), Some(s("x")));
    assert_eq!(map.get(7), Some(s("x")));
}

/// Relational lookups, including the key/entry asymmetry on absence
pub fn test_floor_ceiling<G: Guard>(map: &SkipListMap<i64, String, G>) {
    for k in [2, 4, 8] {
        map.put(k, k.to_string());
    }

    assert_eq!(map.floor_key(6), Ok(4));
    assert_eq!(map.ceiling_key(6), Ok(8));
    assert_eq!(map.floor_key(4), Ok(4));
    assert_eq!(map.lower_key(4), Ok(2));
    assert_eq!(map.higher_key(4), Ok(8));

    assert_eq!(map.floor_key(1), Err(MapError::NoSuchElement));
    assert!(map.floor_entry(1).is_none());
    assert_eq!(map.ceiling_key(9), Err(MapError::NoSuchElement));
    assert!(map.ceiling_entry(9).is_none());

    assert_eq!(map.floor_entry(7), Some(Entry::new(4, s("4"))));
    assert_eq!(map.higher_entry(2), Some(Entry::new(4, s("4"))));
}

/// Removing the only element leaves a usable empty map
pub fn test_remove_only_element<G: Guard>(map: &SkipListMap<i64, String, G>) {
    map.put(9, s("nine"));
    assert_eq!(map.remove(9), Some(s("nine")));

    assert!(map.is_empty());
    assert_eq!(map.len(), 0);
    assert!(map.poll_first_entry().is_none());
    assert!(map.poll_last_entry().is_none());
    assert_eq!(map.first_key(), Err(MapError::NoSuchElement));

    // Idempotent
    assert_eq!(map.remove(9), None);
    assert!(map.is_empty());

    map.put(9, s("again"));
    assert_eq!(map.get(9), Some(s("again")));
}

/// A half-open sub-map sees only its range
pub fn test_sub_map_range<G: Guard>(map: &SkipListMap<i64, String, G>) {
    for k in [1, 2, 4, 8, 9] {
        map.put(k, k.to_string());
    }

    let sub = map.sub_map(2, true, 8, false).unwrap();
    assert_eq!(sub.keys().collect::<Vec<_>>(), vec![2, 4]);
    assert_eq!(sub.len(), 2);
    assert!(!sub.contains_key(8));
    assert_eq!(sub.put(8, s("no")), Err(MapError::KeyOutOfRange));

    let half_open = map.sub_map_range(2, 9).unwrap();
    assert_eq!(half_open.keys().collect::<Vec<_>>(), vec![2, 4, 8]);
    assert_eq!(map.head_map(4, true).unwrap().keys().collect::<Vec<_>>(), vec![1, 2, 4]);
    assert_eq!(map.tail_map(8, false).unwrap().keys().collect::<Vec<_>>(), vec![9]);

    assert_eq!(
        map.sub_map(8, true, 2, true).unwrap_err(),
        MapError::InconsistentRange
    );
}

/// Every accessor behaves on an empty map
pub fn test_empty_map<G: Guard>(map: &SkipListMap<i64, String, G>) {
    assert!(map.is_empty());
    assert_eq!(map.len(), 0);
    assert_eq!(map.get(1), None);
    assert_eq!(map.first_key(), Err(MapError::NoSuchElement));
    assert_eq!(map.last_key(), Err(MapError::NoSuchElement));
    assert!(map.first_entry().is_none());
    assert!(map.last_entry().is_none());
    assert_eq!(map.lower_key(0), Err(MapError::NoSuchElement));
    assert!(map.higher_entry(0).is_none());
    assert!(map.iter().next().is_none());
    assert!(map.descending_map().iter().next().is_none());
    assert!(map.key_set().is_empty());
    assert_eq!(map.replace(1, s("x")), None);
    assert!(map.is_empty());
}

/// Views read and write through to the map
pub fn test_views_write_through<G: Guard>(map: &SkipListMap<i64, String, G>) {
    for k in 1..=6 {
        map.put(k, format!("v{}", k));
    }

    let keys = map.key_set();
    assert!(keys.remove(1));
    assert!(!map.contains_key(1));

    let values = map.values();
    assert!(values.contains(&s("v4")));
    assert!(values.remove_if(|v| v == "v4"));
    assert!(!map.contains_key(4));

    let entries = map.entry_set();
    assert!(entries.remove(&Entry::new(6, s("v6"))));
    assert!(!entries.remove(&Entry::new(5, s("wrong"))));

    assert_eq!(keys.to_vec(), vec![2, 3, 5]);
    map.put(10, s("v10"));
    assert_eq!(keys.last(), Ok(10));

    let mut iter = map.iter();
    assert_eq!(iter.next().map(|e| e.key()), Some(2));
    iter.remove().unwrap();
    assert!(!map.contains_key(2));

    keys.clear();
    assert!(map.is_empty());
}

/// Descending views invert every relation
pub fn test_descending_views<G: Guard>(map: &SkipListMap<i64, String, G>) {
    for k in 1..=10 {
        map.put(k, k.to_string());
    }

    let desc = map.descending_map();
    assert_eq!(desc.first_key(), Ok(10));
    assert_eq!(desc.last_key(), Ok(1));
    assert_eq!(desc.higher_key(5), Ok(4));
    assert_eq!(desc.lower_key(5), Ok(6));
    assert_eq!(desc.poll_first_entry().map(|e| e.key()), Some(10));

    let range = desc.sub_map(8, true, 3, false).unwrap();
    assert_eq!(range.keys().collect::<Vec<_>>(), vec![8, 7, 6, 5, 4]);
    assert_eq!(
        range.descending_map().keys().collect::<Vec<_>>(),
        vec![4, 5, 6, 7, 8]
    );

    let desc_keys = map.descending_key_set();
    assert_eq!(desc_keys.first(), Ok(9));
    assert_eq!(desc_keys.poll_last(), Ok(1));
    assert_eq!(map.first_key(), Ok(2));
}

/// A map built with a reversed comparator iterates and navigates in reverse
pub fn test_reversed_order<G: Guard>() {
    let map: SkipListMap<i64, String, G> = SkipListMap::reversed();
    for k in [3, 1, 4, 1, 5, 9, 2, 6] {
        map.put(k, k.to_string());
    }

    assert_eq!(keys_of(&map), vec![9, 6, 5, 4, 3, 2, 1]);
    assert_eq!(map.first_key(), Ok(9));
    assert_eq!(map.higher_key(5), Ok(4));
    assert_eq!(map.ceiling_key(7), Ok(6));

    let sub = map.sub_map(6, true, 2, false).unwrap();
    assert_eq!(sub.keys().collect::<Vec<_>>(), vec![6, 5, 4, 3]);
    assert!(map.sub_map(2, true, 6, true).is_err());

    let natural: SkipListMap<i64, String, G> = keys_of(&map)
        .into_iter()
        .map(|k| (k, k.to_string()))
        .collect();
    assert_eq!(map, natural);
    assert!(!map.comparator().same_order(natural.comparator()));
}

/// A custom comparator defines the order
pub fn test_custom_comparator<G: Guard>() {
    // Order by absolute value, negative first on ties
    let by_magnitude = KeyComparator::from_fn(|a: i64, b: i64| {
        a.unsigned_abs().cmp(&b.unsigned_abs()).then(a.cmp(&b))
    });
    let map: SkipListMap<i64, String, G> =
        SkipListMap::with_config(MapConfig::new().comparator(by_magnitude));
    for k in [-3, 2, -1, 3, 0] {
        map.put(k, k.to_string());
    }

    assert_eq!(keys_of(&map), vec![0, -1, 2, -3, 3]);
    assert_eq!(map.floor_key(-2), Ok(-1));
    assert_eq!(map.ceiling_key(-2), Ok(2));
}

/// Randomized operations checked step by step against `BTreeMap`
pub fn test_against_model<G: Guard>(config: MapConfig<i64>, seed: u64) {
    let map: SkipListMap<i64, u64, G> = SkipListMap::with_config(config);
    let mut model: BTreeMap<i64, u64> = BTreeMap::new();
    let mut rng = fastrand::Rng::with_seed(seed);

    for step in 0..5_000u64 {
        let key = rng.i64(-100..100);
        match rng.u8(0..8) {
            0 | 1 => assert_eq!(map.put(key, step), model.insert(key, step)),
            2 => {
                let expected = model.get(&key).copied();
                if expected.is_none() {
                    model.insert(key, step);
                }
                assert_eq!(map.put_if_absent(key, step), expected);
            }
            3 | 4 => assert_eq!(map.remove(key), model.remove(&key)),
            5 => {
                let expected = model.range(..=key).next_back().map(|(k, _)| *k);
                assert_eq!(map.floor_key(key).ok(), expected);
            }
            6 => {
                let expected = model.range(key + 1..).next().map(|(k, v)| (*k, *v));
                assert_eq!(map.higher_entry(key).map(|e| e.into_parts()), expected);
            }
            _ => assert_eq!(map.get(key), model.get(&key).copied()),
        }
    }

    assert_eq!(map.len(), model.len());
    let contents: Vec<(i64, u64)> = map.iter().map(|e| e.into_parts()).collect();
    let expected: Vec<(i64, u64)> = model.into_iter().collect();
    assert_eq!(contents, expected);
}

/// Disjoint concurrent inserts all land, in order
pub fn test_concurrent_inserts<G: Guard + 'static>(config: MapConfig<i64>) {
    let map: Arc<SkipListMap<i64, u64, G>> = Arc::new(SkipListMap::with_config(config));
    let num_threads = 4;
    let items_per_thread = 500;

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                for i in 0..items_per_thread {
                    // Interleave the threads' key ranges
                    let key = (i * num_threads + thread_id) as i64;
                    assert_eq!(map.put(key, thread_id as u64), None);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let total = num_threads * items_per_thread;
    assert_eq!(map.len(), total);
    let keys: Vec<i64> = map.keys().collect();
    assert_eq!(keys, (0..total as i64).collect::<Vec<_>>());
}

/// Bulk helpers: for_each, replace_all, merge, compute_if_absent, clear
pub fn test_bulk_operations<G: Guard>(config: MapConfig<i64>) {
    let map: SkipListMap<i64, u64, G> = SkipListMap::with_config(config);
    for k in 0..100 {
        map.put(k, k as u64);
    }

    map.replace_all(|_, v| v * 2);
    let mut sum = 0;
    map.for_each(|_, v| sum += *v);
    assert_eq!(sum, 2 * (0..100u64).sum::<u64>());

    assert_eq!(map.merge(5, 1, |a, b| Some(a + b)), Some(11));
    assert_eq!(map.merge(500, 1, |a, b| Some(a + b)), Some(1));
    assert_eq!(map.merge(6, 0, |_, _| None), None);
    assert!(!map.contains_key(6));

    assert_eq!(map.compute_if_absent(6, |k| k as u64 * 100), 600);
    assert_eq!(map.compute_if_absent(6, |_| 0), 600);

    map.clear();
    assert!(map.is_empty());
    assert_eq!(map.len(), 0);
    assert_eq!(map.first_key(), Err(MapError::NoSuchElement));
}
