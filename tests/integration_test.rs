//! Integration tests for coordmap
//!
//! These tests exercise the reader/writer protocol across real threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use coordmap::{Backoff, BackoffConfig, MapError, Phase, SortedMap};
use proptest::prelude::*;

fn wait_for(mut done: impl FnMut() -> bool) {
    Backoff::wait_until(BackoffConfig::default(), &mut done);
}

// =============================================================================
// Protocol Tests
// =============================================================================

#[test]
fn test_concurrent_readers_do_not_block_each_other() {
    let map = Arc::new(SortedMap::new());
    map.set(1, "one");
    let barrier = Arc::new(Barrier::new(2));

    // each reader waits for the other while inside its own read section
    let readers: Vec<_> = (0..2)
        .map(|_| {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                map.get_with(&1, |value| {
                    barrier.wait();
                    *value
                })
            })
        })
        .collect();

    for reader in readers {
        assert_eq!(reader.join().unwrap(), Some("one"));
    }
    assert_eq!(map.active_readers(), 0);
}

#[test]
fn test_writer_waits_for_in_flight_reader() {
    let map = Arc::new(SortedMap::new());
    map.set(1, 10);

    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (entered_tx, entered_rx) = mpsc::channel::<()>();

    let reader = {
        let map = Arc::clone(&map);
        thread::spawn(move || {
            map.get_with(&1, |value| {
                entered_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                *value
            })
        })
    };
    entered_rx.recv().unwrap();

    let written = Arc::new(AtomicBool::new(false));
    let writer = {
        let map = Arc::clone(&map);
        let written = Arc::clone(&written);
        thread::spawn(move || {
            map.set(1, 20);
            written.store(true, Ordering::SeqCst);
        })
    };

    wait_for(|| map.phase() == Phase::Draining);
    thread::sleep(Duration::from_millis(50));
    assert!(!written.load(Ordering::SeqCst), "write applied while a reader was in flight");
    assert_eq!(map.active_readers(), 1);

    release_tx.send(()).unwrap();
    assert_eq!(reader.join().unwrap(), Some(10));
    writer.join().unwrap();

    assert!(written.load(Ordering::SeqCst));
    assert_eq!(map.get(&1), Some(20));
    assert!(map.verify().is_ok());
}

#[test]
fn test_new_readers_wait_behind_draining_writer() {
    let map = Arc::new(SortedMap::new());
    map.set("k", 1);

    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (entered_tx, entered_rx) = mpsc::channel::<()>();

    let first_reader = {
        let map = Arc::clone(&map);
        thread::spawn(move || {
            map.get_with("k", |_| {
                entered_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            })
        })
    };
    entered_rx.recv().unwrap();

    let writer = {
        let map = Arc::clone(&map);
        thread::spawn(move || map.set("k", 2))
    };
    wait_for(|| map.phase() == Phase::Draining);

    // arrives after the writer started draining, so it must see the write
    let late_reader = {
        let map = Arc::clone(&map);
        thread::spawn(move || map.get("k"))
    };
    thread::sleep(Duration::from_millis(20));
    assert_eq!(map.active_readers(), 1);

    release_tx.send(()).unwrap();
    first_reader.join().unwrap();
    assert_eq!(writer.join().unwrap(), Some(1));
    assert_eq!(late_reader.join().unwrap(), Some(2));
}

#[test]
fn test_panicking_reader_does_not_stall_writers() {
    let map = Arc::new(SortedMap::new());
    map.set(1, 1);

    let panicking = {
        let map = Arc::clone(&map);
        thread::spawn(move || {
            let _: Option<()> = map.get_with(&1, |_| panic!("lookup failed"));
        })
    };
    assert!(panicking.join().is_err());
    assert_eq!(map.active_readers(), 0);

    let writer = {
        let map = Arc::clone(&map);
        thread::spawn(move || map.set(2, 2))
    };
    assert_eq!(writer.join().unwrap(), None);
    assert_eq!(map.keys(), vec![1, 2]);
}

#[test]
fn test_mixed_workload_keeps_protocol() {
    let map: Arc<SortedMap<u32, u32>> = Arc::new(SortedMap::new());
    let mut handles = Vec::new();

    for writer in 0..3u32 {
        let map = Arc::clone(&map);
        handles.push(thread::spawn(move || {
            for i in 0..300u32 {
                let key = (i * 7 + writer) % 50;
                match i % 4 {
                    0 => {
                        let _ = map.insert(key, key + 1000);
                    }
                    1 => {
                        map.set(key, key + 1000);
                    }
                    2 => {
                        map.remove(&key);
                    }
                    _ => {
                        if i % 100 == 3 {
                            map.clear();
                        }
                    }
                }
            }
        }));
    }

    let torn = Arc::new(AtomicBool::new(false));
    for _ in 0..4 {
        let map = Arc::clone(&map);
        let torn = Arc::clone(&torn);
        handles.push(thread::spawn(move || {
            for i in 0..500u32 {
                let key = i % 50;
                if let Some(value) = map.get(&key)
                    && value != key + 1000
                {
                    torn.store(true, Ordering::SeqCst);
                }
                let keys = map.keys();
                if !keys.windows(2).all(|w| w[0] < w[1]) {
                    torn.store(true, Ordering::SeqCst);
                }
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(!torn.load(Ordering::SeqCst));
    let stats = map.stats();
    assert_eq!(stats.active_readers, 0);
    assert_eq!(stats.phase, Phase::Idle);
    assert_eq!(stats.invariant_violations, 0);
    assert_eq!(stats.writes, 3 * 300 - 3 * (300 / 4) + 3 * 3);
    assert!(map.verify().is_ok());
}

#[test]
fn test_concurrent_duplicate_inserts_admit_exactly_one() {
    let map = Arc::new(SortedMap::new());
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                map.insert("shared", i)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| *r == Err(MapError::DuplicateKey))
    );

    let winner = map.value("shared").unwrap();
    assert!(results[winner].is_ok());
    assert_eq!(map.stats().failed_inserts, 7);
}

// =============================================================================
// Property Tests
// =============================================================================

proptest! {
    #[test]
    fn prop_keys_always_ascending(keys in proptest::collection::vec(any::<i32>(), 0..64)) {
        let map = SortedMap::new();
        for key in &keys {
            map.set(*key, ());
        }

        let mut expected = keys.clone();
        expected.sort_unstable();
        expected.dedup();
        prop_assert_eq!(map.keys(), expected);
    }

    #[test]
    fn prop_failed_insert_leaves_map_unchanged(key in any::<u16>(), first in any::<u8>(), second in any::<u8>()) {
        let map = SortedMap::new();
        map.insert(key, first).unwrap();

        prop_assert_eq!(map.insert(key, second), Err(MapError::DuplicateKey));
        prop_assert_eq!(map.get(&key), Some(first));
        prop_assert_eq!(map.len(), 1);
    }
}
