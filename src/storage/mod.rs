//! Storage Module
//!
//! This module provides the storage core for SlashKV: a sharded concurrent
//! hash map and the snapshot codec that persists it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ConcurrentMap                           │
//! │               RwLock<Table> (resize barrier)                │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...2^n   │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            │ snapshot()
//!                            ▼
//!              ┌───────────────────────────┐
//!              │   Snapshot (bincode/JSON) │
//!              └───────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Typed Keys**: text, bytes, booleans, timestamps, integers and floats
//! - **Sharded Storage**: per-shard RwLocks reduce lock contention
//! - **Growth**: the shard array doubles when the load factor is exceeded
//! - **Snapshots**: point-in-time copies with a binary and a JSON form
//!
//! ## Example
//!
//! ```
//! use slashkv::storage::{ConcurrentMap, Key};
//! use bytes::Bytes;
//!
//! let map = ConcurrentMap::new();
//! map.set(Key::from("name"), Bytes::from("Ariz"));
//! map.set(Key::from(42u32), Bytes::from("answer"));
//!
//! let bytes = map.serialize().unwrap();
//! let restored = ConcurrentMap::deserialize(&bytes).unwrap();
//! assert_eq!(restored.get(&Key::UInt(42)), Some(Bytes::from("answer")));
//! ```

pub mod hash;
pub mod key;
pub mod map;
pub mod snapshot;

pub use key::Key;
pub use map::{ConcurrentMap, MapConfig, MapError};
pub use snapshot::{Snapshot, SnapshotError};
