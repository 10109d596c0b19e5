//! Map Keys
//!
//! Keys are a closed set of kinds. Two keys are equal only when both the
//! kind and the value match, so `Text("1")`, `Bytes("1")` and `Int(1)` are
//! three different keys even though some of them share a digest.

use crate::storage::hash;
use crate::storage::map::MapError;
use bytes::Bytes;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A key stored in the [`ConcurrentMap`](crate::storage::ConcurrentMap).
#[derive(Debug, Clone)]
pub enum Key {
    /// UTF-8 text. Wire keys that are valid UTF-8 land here.
    Text(String),
    /// Arbitrary bytes.
    Bytes(Bytes),
    Bool(bool),
    /// A point in time, hashed by its nanoseconds since the UNIX epoch.
    Timestamp(SystemTime),
    /// Signed integers, widened to 64 bits.
    Int(i64),
    /// Unsigned integers, widened to 64 bits.
    UInt(u64),
    /// Floats, widened to 64 bits. Compared by bit pattern.
    Float(f64),
}

/// Tags identifying each key kind inside a binary snapshot.
pub(crate) mod kind {
    pub const TEXT: u8 = 0;
    pub const BYTES: u8 = 1;
    pub const BOOL: u8 = 2;
    pub const TIMESTAMP: u8 = 3;
    pub const INT: u8 = 4;
    pub const UINT: u8 = 5;
    pub const FLOAT: u8 = 6;
}

impl Key {
    /// Builds a key from a wire argument.
    ///
    /// Valid UTF-8 becomes [`Key::Text`] and anything else stays
    /// [`Key::Bytes`], so the same bytes always map to the same key.
    pub fn from_wire(raw: Bytes) -> Self {
        match std::str::from_utf8(&raw) {
            Ok(text) => Key::Text(text.to_owned()),
            Err(_) => Key::Bytes(raw),
        }
    }

    /// Returns the 64-bit digest used for shard addressing.
    #[inline]
    pub fn digest(&self) -> u64 {
        hash::hash_key(self)
    }

    /// Short name of the key kind, used in logs and errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Key::Text(_) => "text",
            Key::Bytes(_) => "bytes",
            Key::Bool(_) => "bool",
            Key::Timestamp(_) => "timestamp",
            Key::Int(_) => "int",
            Key::UInt(_) => "uint",
            Key::Float(_) => "float",
        }
    }

    pub(crate) fn kind_tag(&self) -> u8 {
        match self {
            Key::Text(_) => kind::TEXT,
            Key::Bytes(_) => kind::BYTES,
            Key::Bool(_) => kind::BOOL,
            Key::Timestamp(_) => kind::TIMESTAMP,
            Key::Int(_) => kind::INT,
            Key::UInt(_) => kind::UINT,
            Key::Float(_) => kind::FLOAT,
        }
    }

    /// Encodes the key's value (without its kind tag) for a snapshot.
    pub(crate) fn payload(&self) -> Vec<u8> {
        match self {
            Key::Text(s) => s.as_bytes().to_vec(),
            Key::Bytes(b) => b.to_vec(),
            Key::Bool(b) => vec![u8::from(*b)],
            Key::Timestamp(at) => unix_nanos(*at).to_le_bytes().to_vec(),
            Key::Int(n) => n.to_le_bytes().to_vec(),
            Key::UInt(n) => n.to_le_bytes().to_vec(),
            Key::Float(f) => f.to_bits().to_le_bytes().to_vec(),
        }
    }

    /// Rebuilds a key from a snapshot kind tag and payload.
    ///
    /// An unknown tag, or a payload that does not fit its tag, is an
    /// [`MapError::UnsupportedKeyType`].
    pub(crate) fn decode(tag: u8, payload: Vec<u8>) -> Result<Self, MapError> {
        let key = match tag {
            kind::TEXT => Key::Text(String::from_utf8(payload).map_err(|_| {
                MapError::UnsupportedKeyType("text key is not valid UTF-8".to_string())
            })?),
            kind::BYTES => Key::Bytes(Bytes::from(payload)),
            kind::BOOL => match payload.as_slice() {
                [0] => Key::Bool(false),
                [1] => Key::Bool(true),
                _ => return Err(malformed("bool", payload.len())),
            },
            kind::TIMESTAMP => Key::Timestamp(from_unix_nanos(i64::from_le_bytes(
                fixed(&payload).ok_or_else(|| malformed("timestamp", payload.len()))?,
            ))),
            kind::INT => Key::Int(i64::from_le_bytes(
                fixed(&payload).ok_or_else(|| malformed("int", payload.len()))?,
            )),
            kind::UINT => Key::UInt(u64::from_le_bytes(
                fixed(&payload).ok_or_else(|| malformed("uint", payload.len()))?,
            )),
            kind::FLOAT => Key::Float(f64::from_bits(u64::from_le_bytes(
                fixed(&payload).ok_or_else(|| malformed("float", payload.len()))?,
            ))),
            other => {
                return Err(MapError::UnsupportedKeyType(format!(
                    "unknown key kind tag {}",
                    other
                )))
            }
        };
        Ok(key)
    }
}

fn fixed(payload: &[u8]) -> Option<[u8; 8]> {
    payload.try_into().ok()
}

fn malformed(kind: &str, len: usize) -> MapError {
    MapError::UnsupportedKeyType(format!("{} key with {}-byte payload", kind, len))
}

/// Nanoseconds between the UNIX epoch and `at`, saturating at the `i64` range.
pub fn unix_nanos(at: SystemTime) -> i64 {
    match at.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_nanos())
            .map(|n| -n)
            .unwrap_or(i64::MIN),
    }
}

/// Inverse of [`unix_nanos`].
pub fn from_unix_nanos(nanos: i64) -> SystemTime {
    if nanos >= 0 {
        UNIX_EPOCH + Duration::from_nanos(nanos as u64)
    } else {
        UNIX_EPOCH - Duration::from_nanos(nanos.unsigned_abs())
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Key::Text(a), Key::Text(b)) => a == b,
            (Key::Bytes(a), Key::Bytes(b)) => a == b,
            (Key::Bool(a), Key::Bool(b)) => a == b,
            (Key::Timestamp(a), Key::Timestamp(b)) => a == b,
            (Key::Int(a), Key::Int(b)) => a == b,
            (Key::UInt(a), Key::UInt(b)) => a == b,
            // Bitwise so NaN keys can be found again.
            (Key::Float(a), Key::Float(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for Key {}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Text(s) => f.write_str(s),
            Key::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
            Key::Bool(b) => write!(f, "{}", b),
            Key::Timestamp(at) => write!(f, "{}", unix_nanos(*at)),
            Key::Int(n) => write!(f, "{}", n),
            Key::UInt(n) => write!(f, "{}", n),
            Key::Float(x) => write!(f, "{}", x),
        }
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_owned())
    }
}

impl From<Bytes> for Key {
    fn from(b: Bytes) -> Self {
        Key::Bytes(b)
    }
}

impl From<Vec<u8>> for Key {
    fn from(b: Vec<u8>) -> Self {
        Key::Bytes(Bytes::from(b))
    }
}

impl From<bool> for Key {
    fn from(b: bool) -> Self {
        Key::Bool(b)
    }
}

impl From<SystemTime> for Key {
    fn from(at: SystemTime) -> Self {
        Key::Timestamp(at)
    }
}

impl From<f32> for Key {
    fn from(x: f32) -> Self {
        Key::Float(f64::from(x))
    }
}

impl From<f64> for Key {
    fn from(x: f64) -> Self {
        Key::Float(x)
    }
}

macro_rules! widen_into_key {
    ($variant:ident, $wide:ty: $($narrow:ty),+) => {
        $(
            impl From<$narrow> for Key {
                fn from(n: $narrow) -> Self {
                    Key::$variant(n as $wide)
                }
            }
        )+
    };
}

widen_into_key!(Int, i64: i8, i16, i32, i64, isize);
widen_into_key!(UInt, u64: u8, u16, u32, u64, usize);
