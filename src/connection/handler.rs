//! Connection Handler
//!
//! Each client gets its own task running [`ConnectionHandler::run`]. The
//! task waits on three things at once:
//!
//! ```text
//!            ┌──────────────────────────────┐
//!  socket ──>│                              │
//!            │  select!                     │
//!  outbox ──>│   - bytes from the client    │──> execute / write
//!            │   - published messages       │
//! shutdown ─>│   - server shutdown          │
//!            └──────────────────────────────┘
//! ```
//!
//! Complete frames are parsed out of a `BytesMut` buffer, executed in order,
//! and their replies written back before the next read, so pipelined
//! commands are answered in sequence. Every write is bounded by the send
//! timeout; a client that stops reading is disconnected rather than allowed
//! to pin the task.

use crate::commands::CommandHandler;
use crate::protocol::{parse_frame, Frame, ParseError};
use crate::server::Store;
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, watch};
use tokio::time;
use tracing::{debug, info, trace, warn};

/// Largest amount of unparsed input a client may buffer (64 MB).
const MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;

const INITIAL_BUFFER_SIZE: usize = 4096;

/// Counters shared by every connection.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub connections_accepted: AtomicU64,
    pub active_connections: AtomicU64,
    pub commands_processed: AtomicU64,
    /// Published messages written to subscribers.
    pub messages_delivered: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_delivered(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Client closed the socket between commands
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Client closed the socket in the middle of a command
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    #[error("Buffer size limit exceeded")]
    BufferFull,

    #[error("Send timed out after {0:?}")]
    SendTimeout(Duration),
}

enum Event {
    Read(usize),
    Message(Frame),
    Shutdown,
}

/// Drives a single client connection.
pub struct ConnectionHandler<S> {
    stream: BufWriter<S>,
    addr: SocketAddr,
    buffer: BytesMut,
    commands: CommandHandler,
    /// Published messages for this client.
    inbox: mpsc::Receiver<Frame>,
    shutdown: watch::Receiver<bool>,
    send_timeout: Duration,
    stats: Arc<ConnectionStats>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        addr: SocketAddr,
        store: Arc<Store>,
        shutdown: watch::Receiver<bool>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        let config = store.config();
        let send_timeout = config.send_timeout;
        let (outbox, inbox) = mpsc::channel(config.outbox_capacity.max(1));
        let client = store.next_client_id();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            commands: CommandHandler::new(store, client, outbox),
            inbox,
            shutdown,
            send_timeout,
            stats,
        }
    }

    /// Runs the connection until the client leaves, an error occurs, or the
    /// server shuts down.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, id = self.commands.client(), "Client connected");

        let result = self.main_loop().await;
        self.commands.disconnect();

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "Client disconnected")
            }
            Err(ConnectionError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            if *self.shutdown.borrow() {
                return Ok(());
            }

            while let Some(command) = self.try_parse_command().await? {
                let response = self.commands.execute(command).await;
                self.stats.command_processed();

                for frame in response.frames() {
                    self.send(frame).await?;
                }
                if response.closes() {
                    return Ok(());
                }
            }

            match self.next_event().await? {
                Event::Read(0) if self.buffer.is_empty() => {
                    return Err(ConnectionError::ClientDisconnected)
                }
                Event::Read(0) => return Err(ConnectionError::UnexpectedEof),
                Event::Read(n) => {
                    self.stats.bytes_read(n);
                    trace!(client = %self.addr, bytes = n, "Read data");
                }
                Event::Message(frame) => {
                    self.send(&frame).await?;
                    self.stats.message_delivered();
                }
                Event::Shutdown => {
                    debug!(client = %self.addr, "Closing for server shutdown");
                    return Ok(());
                }
            }
        }
    }

    /// Parses the next complete command out of the buffer, if there is one.
    ///
    /// Malformed input gets a best-effort error reply before the connection
    /// is dropped.
    async fn try_parse_command(&mut self) -> Result<Option<Frame>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match parse_frame(&self.buffer) {
            Ok(Some((frame, consumed))) => {
                self.buffer.advance(consumed);
                trace!(
                    client = %self.addr,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed command"
                );
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(client = %self.addr, error = %e, "Protocol error");
                let _ = self
                    .send(&Frame::error(format!("ERR Protocol error: {}", e)))
                    .await;
                Err(ConnectionError::Parse(e))
            }
        }
    }

    async fn next_event(&mut self) -> Result<Event, ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            warn!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let event = tokio::select! {
            read = self.stream.get_mut().read_buf(&mut self.buffer) => Event::Read(read?),
            Some(frame) = self.inbox.recv() => Event::Message(frame),
            // A dropped sender means the server is gone too.
            _ = self.shutdown.changed() => Event::Shutdown,
        };
        Ok(event)
    }

    /// Writes one frame and flushes it within the send timeout.
    async fn send(&mut self, frame: &Frame) -> Result<(), ConnectionError> {
        let bytes = frame.encode();
        let limit = self.send_timeout;
        let stream = &mut self.stream;

        let write = async {
            stream.write_all(&bytes).await?;
            stream.flush().await
        };
        match time::timeout(limit, write).await {
            Ok(result) => result?,
            Err(_) => return Err(ConnectionError::SendTimeout(limit)),
        }

        self.stats.bytes_written(bytes.len());
        trace!(client = %self.addr, bytes = bytes.len(), "Sent frame");
        Ok(())
    }
}

/// Runs a connection to completion, logging how it ended.
pub async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    store: Arc<Store>,
    shutdown: watch::Receiver<bool>,
    stats: Arc<ConnectionStats>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handler = ConnectionHandler::new(stream, addr, store, shutdown, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::Io(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}
