//! Command Handler Module
//!
//! This module implements the command processing layer for SlashKV.
//! It receives parsed RESP frames, executes them against the shared store,
//! and returns the frames to send back.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RESP Parser    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Validate     │
//! │  - Dispatch     │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ Store           │  (map + pub/sub registry)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! | Command                       | Reply                          |
//! |-------------------------------|--------------------------------|
//! | `PING`                        | `+PONG`                        |
//! | `QUIT`                        | `+OK`, then close              |
//! | `SET key value`               | `+OK`                          |
//! | `GET key`                     | bulk or null                   |
//! | `DEL key`                     | `+OK`                          |
//! | `MSET key value [...]`        | `+OK`                          |
//! | `MGET key [...]`              | array of bulk/null             |
//! | `SAVE`                        | `+OK` or `-ERR`                |
//! | `PUBLISH channel message`     | number of receivers            |
//! | `SUBSCRIBE channel [...]`     | one confirmation per channel   |
//! | `PSUBSCRIBE pattern [...]`    | one confirmation per pattern   |

pub mod handler;

pub use handler::{CommandHandler, Response};
