//! RESP Frames
//!
//! A [`Frame`] is one complete RESP2 value, either parsed from a client or
//! about to be written back to one.
//!
//! ## Wire Format
//!
//! | Prefix | Frame             | Example                       |
//! |--------|-------------------|-------------------------------|
//! | `+`    | Simple string     | `+OK\r\n`                     |
//! | `-`    | Error             | `-ERR unknown command\r\n`    |
//! | `:`    | Integer           | `:1000\r\n`                   |
//! | `$`    | Bulk string       | `$5\r\nhello\r\n`             |
//! | `$-1`  | Null              | `$-1\r\n`                     |
//! | `*`    | Array             | `*1\r\n$4\r\nPING\r\n`        |

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// The CRLF terminator ending every RESP line.
pub const CRLF: &[u8] = b"\r\n";

/// RESP type prefixes.
pub mod prefix {
    pub const SIMPLE: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A single RESP value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Non-binary-safe status text; must not contain CRLF.
    Simple(String),
    Error(String),
    Integer(i64),
    /// Binary-safe string.
    Bulk(Bytes),
    /// Null bulk string (also produced for a null array).
    Null,
    Array(Vec<Frame>),
}

impl Frame {
    pub fn ok() -> Self {
        Frame::Simple("OK".to_string())
    }

    pub fn pong() -> Self {
        Frame::Simple("PONG".to_string())
    }

    pub fn null() -> Self {
        Frame::Null
    }

    pub fn error(message: impl Into<String>) -> Self {
        Frame::Error(message.into())
    }

    pub fn integer(n: i64) -> Self {
        Frame::Integer(n)
    }

    /// Creates a bulk string frame.
    ///
    /// ```
    /// use slashkv::protocol::Frame;
    /// assert_eq!(&Frame::bulk("hi").encode()[..], b"$2\r\nhi\r\n");
    /// ```
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::Bulk(data.into())
    }

    pub fn array(frames: Vec<Frame>) -> Self {
        Frame::Array(frames)
    }

    /// Encodes the frame into a fresh buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len_hint());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Appends the wire form of this frame to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Frame::Simple(text) => put_line(buf, prefix::SIMPLE, text.as_bytes()),
            Frame::Error(text) => put_line(buf, prefix::ERROR, text.as_bytes()),
            Frame::Integer(n) => put_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            Frame::Bulk(data) => {
                put_line(buf, prefix::BULK, data.len().to_string().as_bytes());
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            Frame::Null => put_line(buf, prefix::BULK, b"-1"),
            Frame::Array(frames) => {
                put_line(buf, prefix::ARRAY, frames.len().to_string().as_bytes());
                for frame in frames {
                    frame.encode_into(buf);
                }
            }
        }
    }

    fn encoded_len_hint(&self) -> usize {
        match self {
            Frame::Bulk(data) => data.len() + 16,
            Frame::Array(frames) => frames.iter().map(Frame::encoded_len_hint).sum::<usize>() + 16,
            _ => 32,
        }
    }

    /// Splits a client command into its arguments.
    ///
    /// Returns `None` unless the frame is an array made only of bulk strings.
    pub fn into_args(self) -> Option<Vec<Bytes>> {
        match self {
            Frame::Array(frames) => frames
                .into_iter()
                .map(|frame| match frame {
                    Frame::Bulk(data) => Some(data),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_))
    }
}

#[inline]
fn put_line(buf: &mut BytesMut, prefix: u8, body: &[u8]) {
    buf.reserve(body.len() + 3);
    buf.put_u8(prefix);
    buf.put_slice(body);
    buf.put_slice(CRLF);
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(text) => write!(f, "\"{}\"", text),
            Frame::Error(text) => write!(f, "(error) {}", text),
            Frame::Integer(n) => write!(f, "(integer) {}", n),
            Frame::Bulk(data) => match std::str::from_utf8(data) {
                Ok(text) => write!(f, "\"{}\"", text),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            Frame::Null => write!(f, "(nil)"),
            Frame::Array(frames) if frames.is_empty() => write!(f, "(empty array)"),
            Frame::Array(frames) => {
                for (i, frame) in frames.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {}", i + 1, frame)?;
                }
                Ok(())
            }
        }
    }
}
