//! Common stress tests for `SkipListMap`.
//!
//! These tests verify concurrent correctness under high contention.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use crate::config::MapConfig;
use crate::data_structures::SkipListMap;
use crate::guard::Guard;

type StressMap<G> = SkipListMap<i64, u64, G>;

fn shared<G: Guard>(config: MapConfig<i64>) -> Arc<StressMap<G>> {
    Arc::new(SkipListMap::with_config(config))
}

fn join_all(handles: Vec<thread::JoinHandle<()>>) {
    for handle in handles {
        handle.join().unwrap();
    }
}

/// Of many threads racing `put_if_absent` on the same keys, exactly one wins
/// each key
pub fn test_put_if_absent_single_winner<G: Guard + 'static>(config: MapConfig<i64>) {
    let map = shared::<G>(config);
    let num_threads = 8;
    let num_keys = 200;
    let barrier = Arc::new(Barrier::new(num_threads));
    let wins = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);
            let wins = Arc::clone(&wins);
            thread::spawn(move || {
                barrier.wait();
                for k in 0..num_keys {
                    if map.put_if_absent(k, t as u64).is_none() {
                        wins.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();
    join_all(handles);

    assert_eq!(wins.load(Ordering::Relaxed), num_keys as usize);
    assert_eq!(map.len(), num_keys as usize);
}

/// Concurrent removes of one key: one succeeds, the rest see absence
pub fn test_concurrent_remove_same_key<G: Guard + 'static>(config: MapConfig<i64>) {
    let map = shared::<G>(config);
    let num_threads = 8;

    for round in 0..200 {
        map.put(round, round as u64);
        let barrier = Arc::new(Barrier::new(num_threads));
        let removed = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..num_threads)
            .map(|_| {
                let map = Arc::clone(&map);
                let barrier = Arc::clone(&barrier);
                let removed = Arc::clone(&removed);
                thread::spawn(move || {
                    barrier.wait();
                    if map.remove(round) == Some(round as u64) {
                        removed.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        join_all(handles);

        assert_eq!(removed.load(Ordering::Relaxed), 1, "round {}", round);
        assert!(!map.contains_key(round));
    }
    assert!(map.is_empty());
}

/// Readers always see strictly ascending keys without duplicates while
/// writers churn the map
pub fn test_order_under_churn<G: Guard + 'static>(config: MapConfig<i64>) {
    let map = shared::<G>(config);
    let stop = Arc::new(AtomicBool::new(false));
    let scans = Arc::new(AtomicUsize::new(0));

    for k in (0..2_000).step_by(2) {
        map.put(k, k as u64);
    }

    let mut handles = vec![];

    for t in 0..4 {
        let map = Arc::clone(&map);
        let stop = Arc::clone(&stop);
        handles.push(thread::spawn(move || {
            let mut rng = fastrand::Rng::with_seed(t);
            while !stop.load(Ordering::Relaxed) {
                let key = rng.i64(0..2_000);
                if rng.bool() {
                    map.put(key, key as u64);
                } else {
                    map.remove(key);
                }
            }
        }));
    }

    for descending in [false, true] {
        for _ in 0..2 {
            let map = Arc::clone(&map);
            let stop = Arc::clone(&stop);
            let scans = Arc::clone(&scans);
            handles.push(thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let keys: Vec<i64> = if descending {
                        map.descending_map().keys().collect()
                    } else {
                        map.keys().collect()
                    };
                    for pair in keys.windows(2) {
                        if descending {
                            assert!(pair[0] > pair[1], "descending order broken: {:?}", pair);
                        } else {
                            assert!(pair[0] < pair[1], "ascending order broken: {:?}", pair);
                        }
                    }
                    scans.fetch_add(1, Ordering::Relaxed);
                }
            }));
        }
    }

    thread::sleep(Duration::from_millis(500));
    stop.store(true, Ordering::Relaxed);
    join_all(handles);

    assert!(scans.load(Ordering::Relaxed) > 0);
    let keys: Vec<i64> = map.keys().collect();
    assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
}

/// Range views never yield keys outside their bounds under churn
pub fn test_range_containment_under_churn<G: Guard + 'static>(config: MapConfig<i64>) {
    let map = shared::<G>(config);
    let stop = Arc::new(AtomicBool::new(false));

    let mut handles = vec![];
    for t in 0..4 {
        let map = Arc::clone(&map);
        let stop = Arc::clone(&stop);
        handles.push(thread::spawn(move || {
            let mut rng = fastrand::Rng::with_seed(100 + t);
            while !stop.load(Ordering::Relaxed) {
                let key = rng.i64(0..1_000);
                if rng.u8(0..3) == 0 {
                    map.remove(key);
                } else {
                    map.put(key, key as u64);
                }
            }
        }));
    }

    for t in 0..2 {
        let map = Arc::clone(&map);
        let stop = Arc::clone(&stop);
        handles.push(thread::spawn(move || {
            let mut rng = fastrand::Rng::with_seed(200 + t);
            while !stop.load(Ordering::Relaxed) {
                let lo = rng.i64(0..900);
                let hi = lo + rng.i64(1..100);
                let sub = map.sub_map(lo, true, hi, false).unwrap();
                for key in sub.keys() {
                    assert!(key >= lo && key < hi, "{} escaped [{}, {})", key, lo, hi);
                }
                if let Ok(first) = sub.first_key() {
                    assert!(first >= lo && first < hi);
                }
                if let Some(entry) = sub.descending_map().first_entry() {
                    assert!(entry.key() >= lo && entry.key() < hi);
                }
                if let Ok(floor) = sub.floor_key(hi + 50) {
                    assert!(floor < hi);
                }
            }
        }));
    }

    thread::sleep(Duration::from_millis(300));
    stop.store(true, Ordering::Relaxed);
    join_all(handles);
}

/// Polling from both ends hands every key to exactly one thread
pub fn test_poll_hands_out_each_key_once<G: Guard + 'static>(config: MapConfig<i64>) {
    let map = shared::<G>(config);
    let total = 4_000;
    for k in 0..total {
        map.put(k, k as u64);
    }

    let num_threads = 8;
    let barrier = Arc::new(Barrier::new(num_threads));
    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut polled = Vec::new();
                loop {
                    let entry = if t % 2 == 0 {
                        map.poll_first_entry()
                    } else {
                        map.poll_last_entry()
                    };
                    match entry {
                        Some(entry) => polled.push(entry.key()),
                        None => break,
                    }
                }
                polled
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for key in handle.join().unwrap() {
            assert!(seen.insert(key), "key {} polled twice", key);
        }
    }
    assert_eq!(seen.len(), total as usize);
    assert!(map.is_empty());
    assert_eq!(map.len(), 0);
}

/// Concurrent `merge` calls on shared counters lose no updates
pub fn test_merge_counts_every_update<G: Guard + 'static>(config: MapConfig<i64>) {
    let map = shared::<G>(config);
    let num_threads = 8;
    let per_thread = 1_000;
    let num_keys = 16;

    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                for i in 0..per_thread {
                    map.merge(i % num_keys, 1, |a, b| Some(a + b));
                }
            })
        })
        .collect();
    join_all(handles);

    let mut total = 0;
    map.for_each(|_, v| total += *v);
    assert_eq!(total, (num_threads * per_thread) as u64);
    assert_eq!(map.len(), num_keys as usize);
}

/// `len` is not a snapshot while writers run, but it settles on the exact
/// count once they stop
pub fn test_len_settles_when_quiescent<G: Guard + 'static>(config: MapConfig<i64>) {
    let map = shared::<G>(config);
    let stop = Arc::new(AtomicBool::new(false));

    let mut handles = vec![];
    for t in 0..4 {
        let map = Arc::clone(&map);
        let stop = Arc::clone(&stop);
        handles.push(thread::spawn(move || {
            let mut rng = fastrand::Rng::with_seed(300 + t);
            while !stop.load(Ordering::Relaxed) {
                let key = rng.i64(0..500);
                if rng.bool() {
                    map.put(key, 0);
                } else {
                    map.remove(key);
                }
            }
        }));
    }

    {
        let map = Arc::clone(&map);
        let stop = Arc::clone(&stop);
        handles.push(thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                // Only a bound can be asserted mid-flight
                assert!(map.len() <= 500 + 4);
                let _ = map.keys().count();
            }
        }));
    }

    thread::sleep(Duration::from_millis(300));
    stop.store(true, Ordering::Relaxed);
    join_all(handles);

    assert_eq!(map.len(), map.keys().count());
    assert_eq!(map.len(), map.key_set().len());
}

/// Iterators stay usable while the entries around them are removed and
/// re-inserted
pub fn test_iterator_survives_churn<G: Guard + 'static>(config: MapConfig<i64>) {
    let map = shared::<G>(config);
    for k in 0..1_000 {
        map.put(k, k as u64);
    }
    let stop = Arc::new(AtomicBool::new(false));

    let writer = {
        let map = Arc::clone(&map);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut round = 0u64;
            while !stop.load(Ordering::Relaxed) {
                for k in (0..1_000).step_by(3) {
                    map.remove(k);
                }
                for k in (0..1_000).step_by(3) {
                    map.put(k, round);
                }
                round += 1;
            }
        })
    };

    for _ in 0..50 {
        let mut previous = None;
        let mut count = 0;
        for entry in map.iter() {
            if let Some(previous) = previous {
                assert!(entry.key() > previous);
            }
            previous = Some(entry.key());
            count += 1;
        }
        // Keys the writer never touches are always seen
        assert!(count >= 1_000 - 334);
        assert!(count <= 1_000);
    }

    stop.store(true, Ordering::Relaxed);
    writer.join().unwrap();
}
