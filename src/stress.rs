//! Stress harness
//!
//! Runs reader and writer threads against one shared map and checks the
//! protocol held. Writers only ever store `key * 2` under `key`, so a reader
//! that sees anything else observed a torn or overlapping write.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::backoff::BackoffConfig;
use crate::error::MapError;
use crate::map::{MapStats, SortedMap};

/// Largest key space whose keys can all be doubled without overflow
pub const MAX_KEY_SPACE: u64 = u64::MAX / 2;

/// Stress run parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StressConfig {
    /// Reader threads
    pub readers: usize,

    /// Writer threads
    pub writers: usize,

    /// Operations per thread
    #[serde(rename = "ops-per-thread")]
    pub ops_per_thread: u64,

    /// Keys are drawn from `0..key_space`
    #[serde(rename = "key-space")]
    pub key_space: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            readers: 4,
            writers: 2,
            ops_per_thread: 10_000,
            key_space: 256,
        }
    }
}

impl StressConfig {
    pub fn validate(&self) -> Result<()> {
        if self.readers + self.writers == 0 {
            return Err(eyre::eyre!("Stress run needs at least one reader or writer thread"));
        }
        if self.key_space == 0 {
            return Err(eyre::eyre!("key-space must be greater than zero"));
        }
        // values are stored as key * 2
        if self.key_space > MAX_KEY_SPACE {
            return Err(eyre::eyre!("key-space must be at most {}", MAX_KEY_SPACE));
        }
        Ok(())
    }
}

/// Per-operation tallies
#[derive(Debug, Default)]
struct OpCounters {
    lookups: AtomicU64,
    hits: AtomicU64,
    membership_tests: AtomicU64,
    equality_tests: AtomicU64,
    ordered_scans: AtomicU64,
    inserts: AtomicU64,
    duplicate_inserts: AtomicU64,
    sets: AtomicU64,
    removes: AtomicU64,
    clears: AtomicU64,
    bad_observations: AtomicU64,
}

/// Outcome of a stress run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub config: StressConfig,
    pub lookups: u64,
    pub hits: u64,
    pub membership_tests: u64,
    pub equality_tests: u64,
    pub ordered_scans: u64,
    pub inserts: u64,
    pub duplicate_inserts: u64,
    pub sets: u64,
    pub removes: u64,
    pub clears: u64,
    /// Values or orderings a reader saw that no writer could have produced
    pub bad_observations: u64,
    pub map: MapStats,
}

impl StressReport {
    /// True when the protocol held and readers saw only consistent state
    pub fn passed(&self) -> bool {
        self.bad_observations == 0 && self.map.invariant_violations == 0 && self.map.active_readers == 0
    }

    pub fn total_ops(&self) -> u64 {
        self.lookups
            + self.membership_tests
            + self.equality_tests
            + self.ordered_scans
            + self.inserts
            + self.duplicate_inserts
            + self.sets
            + self.removes
            + self.clears
    }
}

/// Run a stress session
pub fn run(config: &StressConfig, backoff: BackoffConfig) -> Result<StressReport> {
    config.validate().context("Invalid stress configuration")?;

    let run_id = Uuid::now_v7().to_string();
    let started_at = Utc::now();
    info!(%run_id, readers = config.readers, writers = config.writers, ops = config.ops_per_thread, "Stress run starting");

    let map: SortedMap<u64, u64> = SortedMap::with_backoff(backoff);
    let counters = OpCounters::default();
    let start = Instant::now();

    thread::scope(|scope| {
        for reader in 0..config.readers {
            let (map, counters) = (&map, &counters);
            scope.spawn(move || {
                debug!(reader, "reader thread started");
                reader_loop(map, counters, config);
            });
        }
        for writer in 0..config.writers {
            let (map, counters) = (&map, &counters);
            scope.spawn(move || {
                debug!(writer, "writer thread started");
                writer_loop(map, counters, config);
            });
        }
    });

    let elapsed_ms = start.elapsed().as_millis() as u64;
    let stats = map.stats();
    let verdict = map.verify();

    let report = StressReport {
        run_id,
        started_at,
        elapsed_ms,
        config: config.clone(),
        lookups: counters.lookups.load(Ordering::Relaxed),
        hits: counters.hits.load(Ordering::Relaxed),
        membership_tests: counters.membership_tests.load(Ordering::Relaxed),
        equality_tests: counters.equality_tests.load(Ordering::Relaxed),
        ordered_scans: counters.ordered_scans.load(Ordering::Relaxed),
        inserts: counters.inserts.load(Ordering::Relaxed),
        duplicate_inserts: counters.duplicate_inserts.load(Ordering::Relaxed),
        sets: counters.sets.load(Ordering::Relaxed),
        removes: counters.removes.load(Ordering::Relaxed),
        clears: counters.clears.load(Ordering::Relaxed),
        bad_observations: counters.bad_observations.load(Ordering::Relaxed),
        map: stats,
    };

    match verdict {
        Ok(()) => info!(run_id = %report.run_id, elapsed_ms, total_ops = report.total_ops(), "Stress run complete"),
        Err(e) => tracing::error!(run_id = %report.run_id, error = %e, "Stress run detected a protocol violation"),
    }

    Ok(report)
}

fn reader_loop(map: &SortedMap<u64, u64>, counters: &OpCounters, config: &StressConfig) {
    let mut rng = rand::rng();
    for _ in 0..config.ops_per_thread {
        let key = rng.random_range(0..config.key_space);
        match rng.random_range(0..16u8) {
            0..=9 => {
                counters.lookups.fetch_add(1, Ordering::Relaxed);
                if let Some(value) = map.get(&key) {
                    counters.hits.fetch_add(1, Ordering::Relaxed);
                    if value != key * 2 {
                        counters.bad_observations.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            10..=12 => {
                counters.membership_tests.fetch_add(1, Ordering::Relaxed);
                map.contains_key(&key);
            }
            13..=14 => {
                counters.equality_tests.fetch_add(1, Ordering::Relaxed);
                // a present key always holds key * 2
                if map.contains(&key, &(key * 2 + 1)) {
                    counters.bad_observations.fetch_add(1, Ordering::Relaxed);
                }
            }
            _ => {
                counters.ordered_scans.fetch_add(1, Ordering::Relaxed);
                let entries = map.entries();
                let ordered = entries.windows(2).all(|pair| pair[0].0 < pair[1].0);
                let consistent = entries.iter().all(|(k, v)| *v == k * 2);
                if !ordered || !consistent {
                    counters.bad_observations.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

fn writer_loop(map: &SortedMap<u64, u64>, counters: &OpCounters, config: &StressConfig) {
    let mut rng = rand::rng();
    for _ in 0..config.ops_per_thread {
        let key = rng.random_range(0..config.key_space);
        match rng.random_range(0..100u8) {
            0..=39 => match map.insert(key, key * 2) {
                Ok(()) => {
                    counters.inserts.fetch_add(1, Ordering::Relaxed);
                }
                Err(MapError::DuplicateKey) => {
                    counters.duplicate_inserts.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::error!(error = %e, "unexpected insert failure");
                    counters.bad_observations.fetch_add(1, Ordering::Relaxed);
                }
            },
            40..=69 => {
                counters.sets.fetch_add(1, Ordering::Relaxed);
                if let Some(previous) = map.set(key, key * 2)
                    && previous != key * 2
                {
                    counters.bad_observations.fetch_add(1, Ordering::Relaxed);
                }
            }
            70..=98 => {
                counters.removes.fetch_add(1, Ordering::Relaxed);
                map.remove(&key);
            }
            _ => {
                counters.clears.fetch_add(1, Ordering::Relaxed);
                map.clear();
            }
        }
    }
}
