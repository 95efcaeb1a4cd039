//! SortedMap - ordered map with concurrent readers and drained writers

use std::borrow::Borrow;
use std::cell::UnsafeCell;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeBounds;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::backoff::BackoffConfig;
use crate::error::MapError;
use crate::sync::{Phase, SyncState};

/// Snapshot of a map's counters and protocol state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapStats {
    /// Read sections entered
    pub reads: u64,
    /// Write sections admitted
    pub writes: u64,
    /// Inserts rejected because the key existed
    pub failed_inserts: u64,
    /// Times a reader backed out because a writer appeared mid-registration
    pub reader_retries: u64,
    /// Readers registered right now
    pub active_readers: usize,
    /// Current write phase
    pub phase: Phase,
    /// Protocol violations observed (always zero unless the protocol is broken)
    pub invariant_violations: u64,
    /// Number of entries
    pub entries: usize,
}

/// A sorted map that many threads may read at once while writes run alone
///
/// Every read registers as a reader for the duration of the lookup. Every
/// write takes the admission lock, waits for registered readers to drain and
/// only then mutates. Values are handed out by clone (or through a closure)
/// since no borrow may outlive its read section.
///
/// # Example
///
/// ```
/// use coordmap::SortedMap;
///
/// let map = SortedMap::new();
/// map.insert(5, "five").unwrap();
/// map.insert(1, "one").unwrap();
/// map.set(3, "three");
///
/// assert_eq!(map.keys(), vec![1, 3, 5]);
/// assert_eq!(map.get(&3), Some("three"));
/// assert!(map.insert(1, "uno").is_err());
/// ```
pub struct SortedMap<K, V> {
    store: UnsafeCell<BTreeMap<K, V>>,
    sync: SyncState,
    failed_inserts: AtomicU64,
}

// SAFETY: the store is only touched through `read` and `write`. `write` holds
// the admission lock and runs only after every registered reader has left, so
// `&mut` access is exclusive; `read` hands out shared references to any number
// of threads at once, which needs `K: Sync, V: Sync`, and writers may drop
// entries on another thread, which needs `K: Send, V: Send`.
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for SortedMap<K, V> {}

impl<K: Ord, V> SortedMap<K, V> {
    /// Create an empty map with the default backoff policy
    pub fn new() -> Self {
        Self::with_backoff(BackoffConfig::default())
    }

    /// Create an empty map with a custom backoff policy
    pub fn with_backoff(backoff: BackoffConfig) -> Self {
        Self::from_store(BTreeMap::new(), backoff)
    }

    fn from_store(store: BTreeMap<K, V>, backoff: BackoffConfig) -> Self {
        debug!(entries = store.len(), ?backoff, "SortedMap::new: called");
        Self {
            store: UnsafeCell::new(store),
            sync: SyncState::new(backoff),
            failed_inserts: AtomicU64::new(0),
        }
    }

    /// Run `f` inside a read section
    fn read<R>(&self, f: impl FnOnce(&BTreeMap<K, V>) -> R) -> R {
        let _reader = self.sync.enter_read();
        // SAFETY: a registered reader keeps every writer out of `write`.
        let store = unsafe { &*self.store.get() };
        f(store)
    }

    /// Run `f` inside a write section
    fn write<R>(&self, f: impl FnOnce(&mut BTreeMap<K, V>) -> R) -> R {
        let _writer = self.sync.enter_write();
        // SAFETY: the admission lock is held and all readers have drained.
        let store = unsafe { &mut *self.store.get() };
        f(store)
    }

    /// Add an entry, failing if the key is already present
    pub fn insert(&self, key: K, value: V) -> Result<(), MapError> {
        let inserted = self.write(|store| {
            use std::collections::btree_map::Entry;
            match store.entry(key) {
                Entry::Occupied(_) => false,
                Entry::Vacant(slot) => {
                    slot.insert(value);
                    true
                }
            }
        });

        if inserted {
            debug!("SortedMap::insert: entry added");
            Ok(())
        } else {
            self.failed_inserts.fetch_add(1, Ordering::Relaxed);
            debug!("SortedMap::insert: duplicate key rejected");
            Err(MapError::DuplicateKey)
        }
    }

    /// Add or overwrite an entry, returning the previous value
    pub fn set(&self, key: K, value: V) -> Option<V> {
        let previous = self.write(|store| store.insert(key, value));
        debug!(overwrote = previous.is_some(), "SortedMap::set: called");
        previous
    }

    /// Remove an entry; returns whether one was removed
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let removed = self.write(|store| store.remove(key).is_some());
        debug!(removed, "SortedMap::remove: called");
        removed
    }

    /// Remove every entry
    pub fn clear(&self) {
        let dropped = self.write(|store| {
            let len = store.len();
            store.clear();
            len
        });
        debug!(dropped, "SortedMap::clear: called");
    }

    /// Clone out the value for `key`
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
        V: Clone,
    {
        self.get_with(key, V::clone)
    }

    /// Run `f` on the value for `key` without cloning it
    ///
    /// `f` runs inside the read section. Calling a write operation on the same
    /// map from `f` waits on its own reader forever. A nested read from `f`
    /// deadlocks too once a writer is draining: the writer waits for the outer
    /// read and the inner read waits for the writer.
    pub fn get_with<Q, R>(&self, key: &Q, f: impl FnOnce(&V) -> R) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let result = self.read(|store| store.get(key).map(f));
        trace!(found = result.is_some(), "SortedMap::get_with: called");
        result
    }

    /// Clone out the value for `key`, or fail with [`MapError::KeyNotFound`]
    pub fn value<Q>(&self, key: &Q) -> Result<V, MapError>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
        V: Clone,
    {
        self.get(key).ok_or(MapError::KeyNotFound)
    }

    /// Check whether `key` is present
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let found = self.read(|store| store.contains_key(key));
        trace!(found, "SortedMap::contains_key: called");
        found
    }

    /// Check whether `key` is present and maps to a value equal to `value`
    ///
    /// With `V = Option<T>`, `contains(&k, &None)` is true when `k` maps to `None`.
    pub fn contains<Q>(&self, key: &Q, value: &V) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
        V: PartialEq,
    {
        self.read(|store| store.get(key).is_some_and(|stored| stored == value))
    }

    pub fn len(&self) -> usize {
        self.read(|store| store.len())
    }

    pub fn is_empty(&self) -> bool {
        self.read(|store| store.is_empty())
    }

    /// Keys in ascending order
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.read(|store| store.keys().cloned().collect())
    }

    /// Values in ascending key order
    pub fn values(&self) -> Vec<V>
    where
        V: Clone,
    {
        self.read(|store| store.values().cloned().collect())
    }

    /// Entries in ascending key order, taken in one read section
    pub fn entries(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        self.read(|store| store.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// Keys within `range`, ascending
    pub fn range_keys<Q, R>(&self, range: R) -> Vec<K>
    where
        K: Borrow<Q> + Clone,
        Q: Ord + ?Sized,
        R: RangeBounds<Q>,
    {
        self.read(|store| store.range::<Q, R>(range).map(|(k, _)| k.clone()).collect())
    }

    /// Entry with the smallest key
    pub fn first_key_value(&self) -> Option<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        self.read(|store| store.first_key_value().map(|(k, v)| (k.clone(), v.clone())))
    }

    /// Entry with the largest key
    pub fn last_key_value(&self) -> Option<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        self.read(|store| store.last_key_value().map(|(k, v)| (k.clone(), v.clone())))
    }

    /// Current write phase; does not enter a read section
    pub fn phase(&self) -> Phase {
        self.sync.phase()
    }

    /// Readers registered right now; does not enter a read section
    pub fn active_readers(&self) -> usize {
        self.sync.active_readers()
    }

    /// Counters and protocol state
    ///
    /// Counting entries is a read section, so this waits out a pending write.
    pub fn stats(&self) -> MapStats {
        let entries = self.len();
        let counters = &self.sync.counters;
        MapStats {
            reads: counters.reads.load(Ordering::Relaxed),
            writes: counters.writes.load(Ordering::Relaxed),
            failed_inserts: self.failed_inserts.load(Ordering::Relaxed),
            reader_retries: counters.reader_retries.load(Ordering::Relaxed),
            active_readers: self.sync.active_readers(),
            phase: self.sync.phase(),
            invariant_violations: counters.violations.load(Ordering::Relaxed),
            entries,
        }
    }

    /// Fail if a write ever overlapped a registered reader
    pub fn verify(&self) -> Result<(), MapError> {
        let violations = self.sync.counters.violations.load(Ordering::Relaxed);
        if violations == 0 {
            return Ok(());
        }
        Err(MapError::InvariantViolation {
            violations,
            active_readers: self.sync.active_readers(),
            phase: self.sync.phase(),
        })
    }

    /// Take the store back out of the map
    pub fn into_inner(self) -> BTreeMap<K, V> {
        self.store.into_inner()
    }
}

impl<K: Ord, V> Default for SortedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord, V> From<BTreeMap<K, V>> for SortedMap<K, V> {
    fn from(store: BTreeMap<K, V>) -> Self {
        Self::from_store(store, BackoffConfig::default())
    }
}

impl<K: Ord, V> FromIterator<(K, V)> for SortedMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<BTreeMap<K, V>>())
    }
}

impl<K: Ord + Clone, V: Clone> Clone for SortedMap<K, V> {
    fn clone(&self) -> Self {
        let store = self.read(|store| store.clone());
        Self::from_store(store, self.sync.backoff())
    }
}

impl<K: Ord + fmt::Debug, V: fmt::Debug> fmt::Debug for SortedMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.read(|store| f.debug_map().entries(store.iter()).finish())
    }
}
