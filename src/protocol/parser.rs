//! Incremental RESP Parser
//!
//! [`parse_frame`] looks at the front of a read buffer and returns either:
//! - `Ok(Some((frame, consumed)))` - a complete frame used `consumed` bytes
//! - `Ok(None)` - the frame is incomplete, read more and try again
//! - `Err(ParseError)` - the bytes are not valid RESP; the client is dropped
//!
//! Lines that do not start with a RESP prefix are inline commands
//! (`PING\r\n`, `SET k v\r\n`), split on whitespace into an array of bulk
//! strings so telnet-style clients work too.

use crate::protocol::frame::{prefix, Frame, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur while parsing RESP.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// A nested element that does not start with a type prefix
    #[error("unexpected type byte: {0:#04x}")]
    UnexpectedByte(u8),

    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a status line
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Negative length other than the `-1` null marker
    #[error("invalid length: {0}")]
    InvalidLength(i64),

    #[error("bulk string missing trailing CRLF")]
    MissingCrlf,

    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("maximum nesting depth exceeded: {0}")]
    TooDeep(usize),
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Largest bulk string accepted from a client.
pub const MAX_BULK_SIZE: usize = 32 * 1024 * 1024;

/// Largest number of elements accepted in a single array.
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Deepest array nesting accepted.
pub const MAX_NESTING_DEPTH: usize = 16;

/// Parses one frame from the front of `buf`.
///
/// # Example
///
/// ```
/// use slashkv::protocol::{parse_frame, Frame};
///
/// let (frame, used) = parse_frame(b"*1\r\n$4\r\nPING\r\n").unwrap().unwrap();
/// assert_eq!(frame, Frame::array(vec![Frame::bulk("PING")]));
/// assert_eq!(used, 14);
///
/// assert!(parse_frame(b"*1\r\n$4\r\nPI").unwrap().is_none());
/// ```
pub fn parse_frame(buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
    let mut skipped = 0;
    loop {
        let rest = &buf[skipped..];
        if rest.is_empty() {
            return Ok(None);
        }

        if is_prefix(rest[0]) {
            return Ok(parse_value(rest, 0)?.map(|(frame, used)| (frame, skipped + used)));
        }

        let line_end = match find_crlf(rest) {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let args: Vec<Frame> = rest[..line_end]
            .split(|b| b.is_ascii_whitespace())
            .filter(|word| !word.is_empty())
            .map(|word| Frame::Bulk(Bytes::copy_from_slice(word)))
            .collect();

        skipped += line_end + CRLF.len();
        // Blank lines between commands are ignored.
        if !args.is_empty() {
            return Ok(Some((Frame::Array(args), skipped)));
        }
    }
}

#[inline]
fn is_prefix(byte: u8) -> bool {
    matches!(
        byte,
        prefix::SIMPLE | prefix::ERROR | prefix::INTEGER | prefix::BULK | prefix::ARRAY
    )
}

fn parse_value(buf: &[u8], depth: usize) -> ParseResult<Option<(Frame, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }

    let (line, header_len) = match read_line(buf) {
        Some(found) => found,
        None => return Ok(None),
    };

    match buf[0] {
        prefix::SIMPLE => Ok(Some((Frame::Simple(utf8(line)?), header_len))),
        prefix::ERROR => Ok(Some((Frame::Error(utf8(line)?), header_len))),
        prefix::INTEGER => Ok(Some((Frame::Integer(integer(line)?), header_len))),
        prefix::BULK => parse_bulk(buf, line, header_len),
        prefix::ARRAY => parse_array(buf, line, header_len, depth),
        other => Err(ParseError::UnexpectedByte(other)),
    }
}

/// `$<len>\r\n<data>\r\n`
fn parse_bulk(buf: &[u8], line: &[u8], header_len: usize) -> ParseResult<Option<(Frame, usize)>> {
    let len = match length(line)? {
        Some(len) => len,
        None => return Ok(Some((Frame::Null, header_len))),
    };

    if len > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: len,
            max: MAX_BULK_SIZE,
        });
    }

    let end = header_len + len;
    if buf.len() < end + CRLF.len() {
        return Ok(None);
    }
    if &buf[end..end + CRLF.len()] != CRLF {
        return Err(ParseError::MissingCrlf);
    }

    let data = Bytes::copy_from_slice(&buf[header_len..end]);
    Ok(Some((Frame::Bulk(data), end + CRLF.len())))
}

/// `*<count>\r\n<frame>...`
fn parse_array(
    buf: &[u8],
    line: &[u8],
    header_len: usize,
    depth: usize,
) -> ParseResult<Option<(Frame, usize)>> {
    if depth >= MAX_NESTING_DEPTH {
        return Err(ParseError::TooDeep(MAX_NESTING_DEPTH));
    }

    let count = match length(line)? {
        Some(count) => count,
        None => return Ok(Some((Frame::Null, header_len))),
    };

    if count > MAX_ARRAY_LEN {
        return Err(ParseError::MessageTooLarge {
            size: count,
            max: MAX_ARRAY_LEN,
        });
    }

    // Bound the up-front allocation; a short buffer may still be incomplete.
    let mut frames = Vec::with_capacity(count.min(64));
    let mut consumed = header_len;
    for _ in 0..count {
        match parse_value(&buf[consumed..], depth + 1)? {
            Some((frame, used)) => {
                frames.push(frame);
                consumed += used;
            }
            None => return Ok(None),
        }
    }

    Ok(Some((Frame::Array(frames), consumed)))
}

/// Returns the text after the prefix byte up to CRLF, and the length of the
/// whole line including the prefix and CRLF.
fn read_line(buf: &[u8]) -> Option<(&[u8], usize)> {
    find_crlf(&buf[1..]).map(|pos| (&buf[1..1 + pos], 1 + pos + CRLF.len()))
}

/// Parses a length line. `-1` is the null marker.
fn length(line: &[u8]) -> ParseResult<Option<usize>> {
    match integer(line)? {
        -1 => Ok(None),
        n if n < 0 => Err(ParseError::InvalidLength(n)),
        n => Ok(Some(n as usize)),
    }
}

fn integer(line: &[u8]) -> ParseResult<i64> {
    let text = std::str::from_utf8(line).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
    text.parse()
        .map_err(|_| ParseError::InvalidInteger(text.to_string()))
}

fn utf8(line: &[u8]) -> ParseResult<String> {
    std::str::from_utf8(line)
        .map(str::to_owned)
        .map_err(|e| ParseError::InvalidUtf8(e.to_string()))
}

/// Position of the first `\r\n` in `buf`.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|pair| pair == CRLF)
}
