//! RESP Protocol Implementation
//!
//! This module implements the subset of the Redis Serialization Protocol
//! (RESP2) that SlashKV speaks.
//!
//! ## Modules
//!
//! - `frame`: the `Frame` enum and its encoder
//! - `parser`: incremental parser for incoming client data
//!
//! ## Example
//!
//! ```
//! use slashkv::protocol::{parse_frame, Frame};
//!
//! // Parsing incoming data
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (frame, consumed) = parse_frame(data).unwrap().unwrap();
//! assert_eq!(consumed, data.len());
//! assert_eq!(frame.into_args().unwrap().len(), 2);
//!
//! // Creating responses
//! let reply = Frame::bulk("Ariz");
//! assert_eq!(&reply.encode()[..], b"$4\r\nAriz\r\n");
//! ```

pub mod frame;
pub mod parser;

pub use frame::Frame;
pub use parser::{parse_frame, ParseError, ParseResult};
