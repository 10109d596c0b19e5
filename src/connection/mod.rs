//! Connection Handler Module
//!
//! This module manages individual client connections to SlashKV.
//! Each client connection is handled by its own async task.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                    (server::run)                            │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept()
//!                        ▼
//!           ┌────────────────────────┐
//!           │   For each client...   │
//!           └────────────┬───────────┘
//!                        │
//!                        │ spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ Read bytes  │───>│ Parse RESP  │───>│ Execute cmd │     │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘     │
//! │                                               │             │
//! │  ┌─────────────┐                              ▼             │
//! │  │ Pub/sub     │─────────────────────>┌─────────────┐       │
//! │  │ outbox      │                      │ Send frames │       │
//! │  └─────────────┘                      └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Pipelining**: several commands in one TCP packet are answered in order
//! - **Pub/sub delivery**: published messages are written as they arrive
//! - **Send timeout**: a client that stops reading is dropped
//! - **Graceful shutdown**: connections close when the server stops
//! - **Statistics**: connection, command and byte counters

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
