//! Store Lifecycle and Accept Loop
//!
//! [`Store`] bundles everything connections share: the map, the pub/sub
//! registry, and the snapshot file. [`run`] drives the listener until the
//! shutdown future resolves, then persists the map and winds connections
//! down.
//!
//! ## Shutdown Sequence
//!
//! ```text
//! shutdown future resolves
//!        │
//!        ▼
//! 1. stop accepting       (accept loop dropped)
//! 2. notify connections   (watch channel flips to true)
//! 3. wait for tasks       (bounded by the grace period)
//! 4. close writes         (stragglers get an error instead of +OK)
//! 5. save snapshot        (failure is logged, shutdown continues)
//! ```
//!
//! Every write acknowledged before step 4 is in the final snapshot.

use crate::connection::{handle_connection, ConnectionStats};
use crate::pubsub::{ClientId, PubSub};
use crate::storage::snapshot::{self, SnapshotError};
use crate::storage::ConcurrentMap;
use parking_lot::RwLock;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time;
use tracing::{error, info, warn};

/// Name of the snapshot file inside the data directory.
pub const SNAPSHOT_FILE: &str = "kv.db";

/// Default data directory.
pub const DEFAULT_DIR: &str = "./cache-redis";

/// Longest pause between failed accepts.
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Library-side server settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the snapshot file. Created if missing.
    pub dir: PathBuf,
    /// Upper bound on a single reply write before the client is dropped.
    pub send_timeout: Duration,
    /// How long shutdown waits for connections to finish.
    pub shutdown_grace: Duration,
    /// Frames a subscriber may have queued before publishes to it are dropped.
    pub outbox_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_DIR),
            send_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(10),
            outbox_capacity: 1024,
        }
    }
}

impl StoreConfig {
    /// Full path of the snapshot file.
    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }
}

/// Shared server state.
#[derive(Debug)]
pub struct Store {
    map: ConcurrentMap,
    pubsub: PubSub,
    config: StoreConfig,
    path: PathBuf,
    /// Serializes snapshot writes (SAVE vs. shutdown).
    save_lock: Mutex<()>,
    /// True once shutdown has closed the map to writes. Writers hold the
    /// read side while they apply.
    closed: RwLock<bool>,
    next_client: AtomicU64,
}

impl Store {
    /// Opens the store, restoring the snapshot if one exists.
    ///
    /// Never fails: an unreadable snapshot is logged and the store starts
    /// empty. When there is no snapshot yet, an empty one is written right
    /// away so the data directory is usable from the first second.
    pub fn open(config: StoreConfig) -> Self {
        let path = config.snapshot_path();

        let map = if path.exists() {
            match snapshot::read_file(&path) {
                Ok(restored) => {
                    info!(path = %path.display(), entries = restored.len(), "Snapshot loaded");
                    ConcurrentMap::from_snapshot(restored)
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to load snapshot, starting empty");
                    ConcurrentMap::new()
                }
            }
        } else {
            let map = ConcurrentMap::new();
            match map.serialize().and_then(|data| snapshot::write_file(&path, &data)) {
                Ok(()) => info!(path = %path.display(), "Created empty snapshot"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to write initial snapshot"),
            }
            map
        };

        Self {
            map,
            pubsub: PubSub::new(),
            config,
            path,
            save_lock: Mutex::new(()),
            closed: RwLock::new(false),
            next_client: AtomicU64::new(1),
        }
    }

    pub fn map(&self) -> &ConcurrentMap {
        &self.map
    }

    pub fn pubsub(&self) -> &PubSub {
        &self.pubsub
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.path
    }

    /// Applies a mutation to the map unless writes have been closed.
    ///
    /// Returns `None` without calling `f` once [`close_writes`] has run.
    ///
    /// [`close_writes`]: Store::close_writes
    pub fn write<T>(&self, f: impl FnOnce(&ConcurrentMap) -> T) -> Option<T> {
        let closed = self.closed.read();
        if *closed {
            return None;
        }
        Some(f(&self.map))
    }

    /// Rejects all further writes. Waits for writes already in progress.
    pub fn close_writes(&self) {
        *self.closed.write() = true;
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    /// Hands out a fresh id for a new connection.
    pub fn next_client_id(&self) -> ClientId {
        self.next_client.fetch_add(1, Ordering::Relaxed)
    }

    /// Writes a snapshot of the map to disk.
    ///
    /// Returns the number of entries written. Concurrent saves queue up
    /// behind one another.
    pub async fn save(&self) -> Result<usize, SnapshotError> {
        let _guard = self.save_lock.lock().await;

        let contents = self.map.snapshot();
        let entries = contents.len();
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || {
            let data = contents.encode()?;
            snapshot::write_file(&path, &data)
        })
        .await
        .map_err(|e| SnapshotError::Io(io::Error::new(io::ErrorKind::Other, e)))??;

        Ok(entries)
    }
}

/// Accepts connections until `shutdown` resolves, then shuts down cleanly.
///
/// Accept errors are logged and retried with a short backoff; they never
/// stop the server.
pub async fn run(
    listener: TcpListener,
    store: Arc<Store>,
    stats: Arc<ConnectionStats>,
    shutdown: impl Future,
) {
    let (notify_shutdown, _) = watch::channel(false);
    let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel::<()>(1);

    let mut server = Listener {
        listener,
        store: Arc::clone(&store),
        stats,
        notify_shutdown,
        shutdown_complete_tx,
    };

    tokio::select! {
        _ = server.run() => {}
        _ = shutdown => {
            info!("Shutdown signal received, stopping server...");
        }
    }

    let Listener {
        listener,
        notify_shutdown,
        shutdown_complete_tx,
        ..
    } = server;
    drop(listener);

    // Every connection task holds a clone of `shutdown_complete_tx`; once
    // they have all dropped theirs, `recv` returns `None`.
    let _ = notify_shutdown.send(true);
    drop(shutdown_complete_tx);

    let grace = store.config().shutdown_grace;
    if time::timeout(grace, shutdown_complete_rx.recv()).await.is_err() {
        warn!(grace_secs = grace.as_secs(), "Connections still open after grace period");
    }

    // Connections that outlived the grace period must not acknowledge
    // writes the snapshot below would miss.
    store.close_writes();

    match store.save().await {
        Ok(entries) => info!(entries = entries, path = %store.snapshot_path().display(), "Snapshot saved"),
        Err(e) => error!(error = %e, "Failed to save snapshot on shutdown"),
    }

    info!("Server shutdown complete");
}

struct Listener {
    listener: TcpListener,
    store: Arc<Store>,
    stats: Arc<ConnectionStats>,
    notify_shutdown: watch::Sender<bool>,
    shutdown_complete_tx: mpsc::Sender<()>,
}

impl Listener {
    async fn run(&mut self) {
        let mut backoff = Duration::from_millis(10);
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    backoff = Duration::from_millis(10);

                    let store = Arc::clone(&self.store);
                    let stats = Arc::clone(&self.stats);
                    let shutdown = self.notify_shutdown.subscribe();
                    let done = self.shutdown_complete_tx.clone();

                    tokio::spawn(async move {
                        handle_connection(stream, addr, store, shutdown, stats).await;
                        drop(done);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_ACCEPT_BACKOFF);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Key;
    use bytes::Bytes;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    fn config_in(dir: &Path) -> StoreConfig {
        StoreConfig {
            dir: dir.to_path_buf(),
            shutdown_grace: Duration::from_secs(2),
            ..StoreConfig::default()
        }
    }

    #[test]
    fn test_open_creates_initial_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir.path().join("data"));
        let path = config.snapshot_path();

        let store = Store::open(config);

        assert!(store.map().is_empty());
        assert!(path.exists());
        assert!(snapshot::read_file(&path).unwrap().is_empty());
    }

    #[test]
    fn test_open_with_corrupt_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::write(config.snapshot_path(), b"definitely not a snapshot").unwrap();

        let store = Store::open(config);
        assert!(store.map().is_empty());
    }

    #[tokio::test]
    async fn test_save_then_reopen_restores() {
        let dir = tempfile::tempdir().unwrap();

        let store = Store::open(config_in(dir.path()));
        store.map().set(Key::from("name"), Bytes::from("Ariz"));
        store.map().set(Key::Int(7), Bytes::from("seven"));
        assert_eq!(store.save().await.unwrap(), 2);
        drop(store);

        let reopened = Store::open(config_in(dir.path()));
        assert_eq!(reopened.map().len(), 2);
        assert_eq!(reopened.map().get(&Key::from("name")), Some(Bytes::from("Ariz")));
        assert_eq!(reopened.map().get(&Key::Int(7)), Some(Bytes::from("seven")));
    }

    #[tokio::test]
    async fn test_concurrent_saves_serialize() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(config_in(dir.path())));
        for i in 0..100u64 {
            store.map().set(Key::UInt(i), Bytes::from("v"));
        }

        let a = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.save().await }
        });
        let b = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.save().await }
        });

        assert_eq!(a.await.unwrap().unwrap(), 100);
        assert_eq!(b.await.unwrap().unwrap(), 100);
        assert_eq!(snapshot::read_file(store.snapshot_path()).unwrap().len(), 100);
    }

    #[test]
    fn test_client_ids_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(config_in(dir.path()));
        let a = store.next_client_id();
        let b = store.next_client_id();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_shutdown_saves_and_closes_connections() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(config_in(dir.path())));
        let stats = Arc::new(ConnectionStats::new());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (trigger, signal) = oneshot::channel::<()>();

        let server = tokio::spawn(run(listener, Arc::clone(&store), Arc::clone(&stats), signal));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nAriz\r\n")
            .await
            .unwrap();
        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+OK\r\n");

        trigger.send(()).unwrap();
        time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server did not shut down")
            .unwrap();

        // The connection was closed by the server.
        let n = client.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);

        let restored = snapshot::read_file(&dir.path().join(SNAPSHOT_FILE)).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(
            restored.entries()[0],
            (Key::from("name"), Bytes::from("Ariz"))
        );
    }

    #[tokio::test]
    async fn test_writes_acknowledged_during_shutdown_are_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(config_in(dir.path())));
        for i in 0..50_000u64 {
            store.map().set(Key::UInt(i), Bytes::from("filler"));
        }
        let stats = Arc::new(ConnectionStats::new());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (trigger, signal) = oneshot::channel::<()>();
        let server = tokio::spawn(run(listener, Arc::clone(&store), Arc::clone(&stats), signal));

        let mut client = BufReader::new(TcpStream::connect(addr).await.unwrap());
        client.write_all(b"PING\r\n").await.unwrap();
        let mut line = String::new();
        client.read_line(&mut line).await.unwrap();
        assert_eq!(line, "+PONG\r\n");

        trigger.send(()).unwrap();

        // Keep writing until the server hangs up.
        let mut acknowledged = Vec::new();
        for i in 0..100_000u32 {
            let key = format!("late{}", i);
            let command = format!("*3\r\n$3\r\nSET\r\n${}\r\n{}\r\n$1\r\nv\r\n", key.len(), key);
            if client.write_all(command.as_bytes()).await.is_err() {
                break;
            }
            line.clear();
            match client.read_line(&mut line).await {
                Ok(n) if n > 0 && line == "+OK\r\n" => acknowledged.push(key),
                _ => break,
            }
        }

        time::timeout(Duration::from_secs(10), server)
            .await
            .expect("server did not shut down")
            .unwrap();
        assert!(store.is_closed());

        let saved = ConcurrentMap::from_snapshot(snapshot::read_file(store.snapshot_path()).unwrap());
        assert_eq!(saved.len(), 50_000 + acknowledged.len());
        for key in &acknowledged {
            assert_eq!(saved.get(&Key::from(key.as_str())), Some(Bytes::from("v")), "{} lost", key);
        }
    }
}
