//! Sharded Concurrent Hash Map
//!
//! This module implements the table every command runs against. Keys are
//! spread over a power-of-two array of shards; each shard keeps its entries
//! in insertion order behind its own lock.
//!
//! ## Locking Discipline
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  table: RwLock<Table>      (map-wide)                        │
//! │    shared    → get / set / mset / del                        │
//! │    exclusive → resize / snapshot                             │
//! │                                                              │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐       ┌──────────┐  │
//! │  │ Shard 0  │ │ Shard 1  │ │ Shard 2  │  ...  │ Shard N-1│  │
//! │  │ RwLock   │ │ RwLock   │ │ RwLock   │       │ RwLock   │  │
//! │  │ Vec<E>   │ │ Vec<E>   │ │ Vec<E>   │       │ Vec<E>   │  │
//! │  └──────────┘ └──────────┘ └──────────┘       └──────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Readers and writers hold the map-wide lock in shared mode, so they run
//! side by side; two operations only contend when they land on the same
//! shard. A value is always read and replaced under that shard's lock, so a
//! reader never sees a half-written value.
//!
//! ## Resizing
//!
//! Growth is checked before an insert. When `live + pending` would exceed
//! `capacity * load_factor * growth_margin`, the caller takes the map-wide
//! lock exclusively and doubles the shard array until the ratio is back under
//! the threshold. Every entry is re-addressed from its stored hash. Nothing
//! else can run while this happens, so no operation ever observes a mix of
//! the old and new layouts. The table never shrinks.

use crate::storage::hash::shard_index;
use crate::storage::key::Key;
use crate::storage::snapshot::{Snapshot, SnapshotError};
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tracing::debug;

/// Initial number of shards.
pub const DEFAULT_CAPACITY: usize = 16;

/// Target ratio of entries to shards.
pub const DEFAULT_LOAD_FACTOR: f64 = 0.7;

/// Slack multiplied into the load factor so the table does not thrash
/// between doublings.
pub const DEFAULT_GROWTH_MARGIN: f64 = 3.0;

/// Errors raised by map operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MapError {
    /// A key of a kind the map cannot hash or restore.
    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),

    /// A batch write was given different numbers of keys and values.
    #[error("argument mismatch: {keys} keys but {values} values")]
    ArgumentMismatch { keys: usize, values: usize },
}

/// Tuning knobs for a [`ConcurrentMap`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapConfig {
    /// Starting shard count, rounded up to a power of two.
    pub initial_capacity: usize,
    pub load_factor: f64,
    pub growth_margin: f64,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_CAPACITY,
            load_factor: DEFAULT_LOAD_FACTOR,
            growth_margin: DEFAULT_GROWTH_MARGIN,
        }
    }
}

/// One stored key-value pair.
#[derive(Debug, Clone)]
struct Entry {
    key: Key,
    value: Bytes,
    /// Digest computed once at insert; reused when the table grows.
    hash: u64,
}

impl Entry {
    #[inline]
    fn matches(&self, hash: u64, key: &Key) -> bool {
        self.hash == hash && self.key == *key
    }
}

/// A bucket of entries in insertion order.
#[derive(Debug, Default)]
struct Shard {
    chain: RwLock<Vec<Entry>>,
}

impl Shard {
    fn with_chain(chain: Vec<Entry>) -> Self {
        Self {
            chain: RwLock::new(chain),
        }
    }
}

/// The shard array. Replaced wholesale on resize.
#[derive(Debug)]
struct Table {
    shards: Box<[Shard]>,
}

impl Table {
    fn allocate(capacity: usize) -> Self {
        Self {
            shards: (0..capacity).map(|_| Shard::default()).collect(),
        }
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    fn shard(&self, hash: u64) -> &Shard {
        &self.shards[shard_index(hash, self.capacity())]
    }

    /// Doubles the shard array and re-addresses every entry.
    ///
    /// Needs `&mut self`, which only the exclusive map-wide lock hands out,
    /// so the per-shard locks are bypassed with `get_mut`.
    fn grow(&mut self) {
        let capacity = self.capacity() * 2;
        let mut chains: Vec<Vec<Entry>> = (0..capacity).map(|_| Vec::new()).collect();

        for shard in self.shards.iter_mut() {
            for entry in shard.chain.get_mut().drain(..) {
                chains[shard_index(entry.hash, capacity)].push(entry);
            }
        }

        self.shards = chains.into_iter().map(Shard::with_chain).collect();
    }
}

/// A concurrent hash map built from independently locked shards.
///
/// Wrap it in an `Arc` to share it between connection tasks; every method
/// takes `&self`.
///
/// # Example
///
/// ```
/// use slashkv::storage::{ConcurrentMap, Key};
/// use bytes::Bytes;
///
/// let map = ConcurrentMap::new();
/// assert_eq!(map.set(Key::from("name"), Bytes::from("Ariz")), None);
/// assert_eq!(map.get(&Key::from("name")), Some(Bytes::from("Ariz")));
/// assert!(map.del(&Key::from("name")));
/// assert!(map.is_empty());
/// ```
pub struct ConcurrentMap {
    table: RwLock<Table>,
    /// Live entries across all shards.
    len: AtomicUsize,
    config: MapConfig,
}

impl std::fmt::Debug for ConcurrentMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentMap")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Default for ConcurrentMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ConcurrentMap {
    /// Creates an empty map with the default configuration.
    pub fn new() -> Self {
        Self::with_config(MapConfig::default())
    }

    /// Creates an empty map with custom tuning.
    pub fn with_config(config: MapConfig) -> Self {
        let capacity = config.initial_capacity.max(1).next_power_of_two();
        Self {
            table: RwLock::new(Table::allocate(capacity)),
            len: AtomicUsize::new(0),
            config,
        }
    }

    /// Number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current number of shards. Always a power of two.
    pub fn capacity(&self) -> usize {
        self.table.read().capacity()
    }

    /// Looks up a key.
    pub fn get(&self, key: &Key) -> Option<Bytes> {
        let hash = key.digest();
        let table = self.table.read();
        let chain = table.shard(hash).chain.read();
        chain
            .iter()
            .find(|entry| entry.matches(hash, key))
            .map(|entry| entry.value.clone())
    }

    /// Inserts or replaces a key.
    ///
    /// Returns the previous value when the key already existed.
    pub fn set(&self, key: Key, value: Bytes) -> Option<Bytes> {
        self.reserve(1);
        let table = self.table.read();
        self.insert(&table, key, value)
    }

    /// Writes several pairs under a single shared lock.
    ///
    /// Capacity for the whole batch is reserved up front, so the table never
    /// grows halfway through. Every pair is applied; the result holds the
    /// previous value of each pair in order. A length mismatch applies
    /// nothing.
    pub fn mset(&self, keys: Vec<Key>, values: Vec<Bytes>) -> Result<Vec<Option<Bytes>>, MapError> {
        if keys.len() != values.len() {
            return Err(MapError::ArgumentMismatch {
                keys: keys.len(),
                values: values.len(),
            });
        }

        self.reserve(keys.len());
        let table = self.table.read();
        Ok(keys
            .into_iter()
            .zip(values)
            .map(|(key, value)| self.insert(&table, key, value))
            .collect())
    }

    /// Removes a key. Returns `true` if it was present.
    pub fn del(&self, key: &Key) -> bool {
        let hash = key.digest();
        let table = self.table.read();
        let mut chain = table.shard(hash).chain.write();

        match chain.iter().position(|entry| entry.matches(hash, key)) {
            Some(index) => {
                // `remove` keeps the survivors in insertion order.
                chain.remove(index);
                self.len.fetch_sub(1, Ordering::AcqRel);
                true
            }
            None => false,
        }
    }

    /// Copies every live pair at a single point in time.
    ///
    /// Holds the map-wide lock exclusively while copying, so concurrent
    /// snapshots (SAVE vs. shutdown) are serialized against each other and
    /// against all writers.
    pub fn snapshot(&self) -> Snapshot {
        let mut table = self.table.write();
        let mut entries = Vec::with_capacity(self.len());
        for shard in table.shards.iter_mut() {
            entries.extend(
                shard
                    .chain
                    .get_mut()
                    .iter()
                    .map(|entry| (entry.key.clone(), entry.value.clone())),
            );
        }
        Snapshot::new(entries)
    }

    /// Builds a fresh map holding the contents of `snapshot`.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let map = Self::new();
        let entries = snapshot.into_entries();
        map.reserve(entries.len());
        {
            let table = map.table.read();
            for (key, value) in entries {
                map.insert(&table, key, value);
            }
        }
        map
    }

    /// Encodes the live contents with the binary snapshot codec.
    pub fn serialize(&self) -> Result<Vec<u8>, SnapshotError> {
        self.snapshot().encode()
    }

    /// Rebuilds a map from [`serialize`](Self::serialize) output.
    pub fn deserialize(buf: &[u8]) -> Result<Self, SnapshotError> {
        Snapshot::decode(buf).map(Self::from_snapshot)
    }

    /// Renders the live contents as a JSON object for inspection.
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        self.snapshot().to_json()
    }

    /// Builds a map from a JSON object; every member becomes a text key.
    pub fn from_json(buf: &[u8]) -> Result<Self, SnapshotError> {
        Snapshot::from_json(buf).map(Self::from_snapshot)
    }

    /// Inserts into the shard for `key` while the caller holds `table` shared.
    fn insert(&self, table: &Table, key: Key, value: Bytes) -> Option<Bytes> {
        let hash = key.digest();
        let mut chain = table.shard(hash).chain.write();

        if let Some(entry) = chain.iter_mut().find(|entry| entry.matches(hash, &key)) {
            return Some(std::mem::replace(&mut entry.value, value));
        }

        chain.push(Entry { key, value, hash });
        self.len.fetch_add(1, Ordering::AcqRel);
        None
    }

    #[inline]
    fn needs_growth(&self, live: usize, capacity: usize) -> bool {
        live as f64 > capacity as f64 * self.config.load_factor * self.config.growth_margin
    }

    /// Grows the table, if needed, so `additional` more entries fit.
    fn reserve(&self, additional: usize) {
        {
            let table = self.table.read();
            if !self.needs_growth(self.len() + additional, table.capacity()) {
                return;
            }
        }

        let mut table = self.table.write();
        let from = table.capacity();
        // Re-check: another writer may have grown the table first.
        while self.needs_growth(self.len() + additional, table.capacity()) {
            table.grow();
        }

        if table.capacity() != from {
            debug!(
                from = from,
                to = table.capacity(),
                entries = self.len(),
                "Resized shard table"
            );
        }
    }
}
