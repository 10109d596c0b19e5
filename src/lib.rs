//! # SlashKV - A Persistent Sharded Key-Value Store
//!
//! SlashKV is a key-value server speaking the Redis wire protocol (RESP).
//! Its core is a concurrent hash map built from independently locked shards,
//! persisted through atomic snapshot files that survive restarts and
//! graceful shutdown.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              SlashKV                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (server)    │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └──────▲──────┘    └──┬───────┬──┘                  │
//! │                            │              │       │                     │
//! │                            │ outbox       │       ▼                     │
//! │                     ┌──────┴──────┐       │  ┌───────────┐             │
//! │                     │   PubSub    │<──────┘  │  Store    │             │
//! │                     │  registry   │          │  (SAVE)   │             │
//! │                     └─────────────┘          └─────┬─────┘             │
//! │                                                    ▼                    │
//! │                     ┌──────────────────────────────────────────────┐   │
//! │                     │              ConcurrentMap                   │   │
//! │                     │  ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐ │   │
//! │                     │  │Shard 0 │ │Shard 1 │ │Shard 2 │ │...2^n  │ │   │
//! │                     │  └────────┘ └────────┘ └────────┘ └────────┘ │   │
//! │                     └──────────────────────┬───────────────────────┘   │
//! │                                            ▼                            │
//! │                                   <dir>/kv.db snapshot                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use slashkv::connection::ConnectionStats;
//! use slashkv::server::{self, Store, StoreConfig};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(Store::open(StoreConfig::default()));
//!     let stats = Arc::new(ConnectionStats::new());
//!     let listener = TcpListener::bind("127.0.0.1:6379").await?;
//!
//!     server::run(listener, store, stats, tokio::signal::ctrl_c()).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: key hashing, the concurrent map, and the snapshot codec
//! - [`protocol`]: RESP frames and parser
//! - [`pubsub`]: channel and pattern subscriptions
//! - [`commands`]: command validation and dispatch
//! - [`connection`]: per-client read/execute/write loop
//! - [`server`]: store lifecycle, accept loop, graceful shutdown
//!
//! ## Design Highlights
//!
//! ### Two-Level Locking
//!
//! Normal operations take a map-wide lock in shared mode plus one shard
//! lock, so commands on different shards never wait on each other. Resizing
//! and snapshotting take the map-wide lock exclusively and therefore always
//! see a consistent table.
//!
//! ### Atomic Snapshots
//!
//! A snapshot is written to `kv.db.tmp`, synced, then renamed over `kv.db`.
//! A crash mid-save leaves the previous snapshot intact.

pub mod commands;
pub mod connection;
pub mod protocol;
pub mod pubsub;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{Frame, ParseError};
pub use server::{Store, StoreConfig};
pub use storage::{ConcurrentMap, Key, MapConfig, MapError, Snapshot, SnapshotError};

/// The default port SlashKV listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host SlashKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of SlashKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
