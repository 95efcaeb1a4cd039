//! Reader/writer admission protocol
//!
//! Readers register in an atomic counter and never take a lock. Writers take
//! the admission mutex, publish a pending write, drain registered readers and
//! only then flip the phase to `Writing`.
//!
//! The reader side increments first and re-checks the phase afterwards; the
//! writer side publishes `Draining` first and reads the counter afterwards.
//! With `SeqCst` on both halves at least one side always sees the other, so a
//! reader that passed its re-check and a `Writing` phase can never coexist.
//! A reader may still sit in the counter for a moment before backing out.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::backoff::{Backoff, BackoffConfig};

/// Write phase of a map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// No writer admitted; readers may register
    Idle,
    /// A writer holds the admission lock and waits for readers to leave
    Draining,
    /// A writer is mutating the store
    Writing,
}

impl Phase {
    fn as_u8(self) -> u8 {
        match self {
            Phase::Idle => 0,
            Phase::Draining => 1,
            Phase::Writing => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Phase::Idle,
            1 => Phase::Draining,
            _ => Phase::Writing,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Draining => write!(f, "draining"),
            Phase::Writing => write!(f, "writing"),
        }
    }
}

/// Counters kept alongside the protocol (thread-safe)
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub reads: AtomicU64,
    pub writes: AtomicU64,
    pub reader_retries: AtomicU64,
    pub violations: AtomicU64,
}

/// Synchronization state owned by one map
#[derive(Debug)]
pub(crate) struct SyncState {
    readers: AtomicUsize,
    /// Readers that passed the phase re-check and may touch the store
    confirmed: AtomicUsize,
    phase: AtomicU8,
    admission: Mutex<()>,
    backoff: BackoffConfig,
    pub counters: Counters,
}

impl SyncState {
    pub fn new(backoff: BackoffConfig) -> Self {
        Self {
            readers: AtomicUsize::new(0),
            confirmed: AtomicUsize::new(0),
            phase: AtomicU8::new(Phase::Idle.as_u8()),
            admission: Mutex::new(()),
            backoff,
            counters: Counters::default(),
        }
    }

    pub fn backoff(&self) -> BackoffConfig {
        self.backoff
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn active_readers(&self) -> usize {
        self.readers.load(Ordering::SeqCst)
    }

    /// Register a reader; the returned guard deregisters on drop
    pub fn enter_read(&self) -> ReadGuard<'_> {
        loop {
            self.wait_for_idle();
            self.readers.fetch_add(1, Ordering::SeqCst);
            if self.phase() == Phase::Idle {
                self.confirmed.fetch_add(1, Ordering::SeqCst);
                break;
            }
            // a writer published itself between the check and the increment
            self.readers.fetch_sub(1, Ordering::SeqCst);
            self.counters.reader_retries.fetch_add(1, Ordering::Relaxed);
        }
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        ReadGuard { state: self }
    }

    /// Admit a writer once every registered reader has left
    pub fn enter_write(&self) -> WriteGuard<'_> {
        self.wait_for_idle();

        let admission = self.admission.lock().unwrap_or_else(|poisoned| {
            warn!("SyncState::enter_write: recovering poisoned admission lock");
            poisoned.into_inner()
        });

        self.phase.store(Phase::Draining.as_u8(), Ordering::SeqCst);
        Backoff::wait_until(self.backoff, || self.readers.load(Ordering::SeqCst) == 0);
        self.phase.store(Phase::Writing.as_u8(), Ordering::SeqCst);

        self.check_exclusive();

        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        WriteGuard {
            state: self,
            _admission: admission,
        }
    }

    /// Record a violation if a confirmed reader is still inside the store
    ///
    /// Only confirmed readers count: one that incremented `readers` but has
    /// not re-checked the phase yet will back out without touching the store.
    fn check_exclusive(&self) {
        let confirmed = self.confirmed.load(Ordering::SeqCst);
        if confirmed != 0 {
            self.record_violation(confirmed, "writer admitted with confirmed readers");
        }
    }

    fn wait_for_idle(&self) {
        Backoff::wait_until(self.backoff, || self.phase() == Phase::Idle);
    }

    fn record_violation(&self, readers: usize, what: &str) {
        let total = self.counters.violations.fetch_add(1, Ordering::Relaxed) + 1;
        error!(readers, total, "SyncState: {}", what);
    }
}

/// A registered reader
#[must_use]
pub(crate) struct ReadGuard<'a> {
    state: &'a SyncState,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        if self.state.phase() == Phase::Writing {
            self.state
                .record_violation(self.state.active_readers(), "reader overlapped a write");
        }
        self.state.confirmed.fetch_sub(1, Ordering::SeqCst);
        self.state.readers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The admitted writer; resets the phase before releasing the admission lock
#[must_use]
pub(crate) struct WriteGuard<'a> {
    state: &'a SyncState,
    _admission: MutexGuard<'a, ()>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.state.phase.store(Phase::Idle.as_u8(), Ordering::Release);
    }
}
