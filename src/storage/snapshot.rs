//! Snapshot Codec
//!
//! A [`Snapshot`] is a point-in-time list of every live pair in a
//! [`ConcurrentMap`](crate::storage::ConcurrentMap). It has two encodings:
//!
//! ## Binary
//!
//! ```text
//! ┌───────────┬─────────┬──────────────────────────────────────────┐
//! │ "SLKV"    │ version │ bincode(Vec<SnapshotEntry>)              │
//! │ 4 bytes   │ 1 byte  │ { kind: u8, key: Vec<u8>, value: Vec<u8>}│
//! └───────────┴─────────┴──────────────────────────────────────────┘
//! ```
//!
//! This is what the server writes to disk. Every key kind survives a round
//! trip.
//!
//! ## JSON
//!
//! An object keyed by each key's display text. Meant for inspection and
//! bulk import, so it is lossy: on import every member becomes a text key,
//! and two keys that display the same collapse into one member on export.

use crate::storage::key::Key;
use crate::storage::map::MapError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;

/// Leading bytes of every binary snapshot.
pub const SNAPSHOT_MAGIC: &[u8; 4] = b"SLKV";

/// Current binary snapshot version.
pub const SNAPSHOT_VERSION: u8 = 1;

const HEADER_LEN: usize = SNAPSHOT_MAGIC.len() + 1;

/// Errors raised while encoding, decoding, or storing a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("not a snapshot file (bad magic)")]
    BadMagic,

    #[error("unsupported snapshot version: {0}")]
    UnsupportedVersion(u8),

    #[error("snapshot encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JSON snapshot must be an object, found {0}")]
    NotAnObject(&'static str),

    #[error(transparent)]
    Key(#[from] MapError),
}

/// On-disk form of one pair.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEntry {
    kind: u8,
    key: Vec<u8>,
    value: Vec<u8>,
}

/// An ordered copy of every live pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    entries: Vec<(Key, Bytes)>,
}

impl Snapshot {
    pub fn new(entries: Vec<(Key, Bytes)>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(Key, Bytes)] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<(Key, Bytes)> {
        self.entries
    }

    /// Encodes the snapshot in the binary format.
    pub fn encode(&self) -> Result<Vec<u8>, SnapshotError> {
        let entries: Vec<SnapshotEntry> = self
            .entries
            .iter()
            .map(|(key, value)| SnapshotEntry {
                kind: key.kind_tag(),
                key: key.payload(),
                value: value.to_vec(),
            })
            .collect();

        let body = bincode::serialize(&entries)?;
        let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
        buf.extend_from_slice(SNAPSHOT_MAGIC);
        buf.push(SNAPSHOT_VERSION);
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Decodes the binary format.
    ///
    /// Fails on a wrong header, a truncated body, or a key whose kind tag or
    /// payload is not recognized.
    pub fn decode(buf: &[u8]) -> Result<Self, SnapshotError> {
        if buf.len() < HEADER_LEN || &buf[..SNAPSHOT_MAGIC.len()] != SNAPSHOT_MAGIC {
            return Err(SnapshotError::BadMagic);
        }

        let version = buf[SNAPSHOT_MAGIC.len()];
        if version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }

        let raw: Vec<SnapshotEntry> = bincode::deserialize(&buf[HEADER_LEN..])?;
        let entries = raw
            .into_iter()
            .map(|entry| Ok((Key::decode(entry.kind, entry.key)?, Bytes::from(entry.value))))
            .collect::<Result<Vec<_>, SnapshotError>>()?;

        Ok(Self { entries })
    }

    /// Renders the snapshot as a JSON object.
    ///
    /// UTF-8 values become strings; anything else becomes an array of byte
    /// values. When two keys share a display text the later one wins.
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        let mut object = serde_json::Map::with_capacity(self.entries.len());
        for (key, value) in &self.entries {
            let value = match std::str::from_utf8(value) {
                Ok(text) => Value::String(text.to_owned()),
                Err(_) => Value::Array(value.iter().map(|&b| Value::from(b)).collect()),
            };
            object.insert(key.to_string(), value);
        }
        Ok(serde_json::to_string(&Value::Object(object))?)
    }

    /// Parses a JSON object into a snapshot of text keys.
    ///
    /// A string member stores its bytes and an array of byte values stores
    /// those bytes. Any other value is stored as its compact JSON text.
    pub fn from_json(buf: &[u8]) -> Result<Self, SnapshotError> {
        let object = match serde_json::from_slice::<Value>(buf)? {
            Value::Object(object) => object,
            other => return Err(SnapshotError::NotAnObject(json_type_name(&other))),
        };

        let entries = object
            .into_iter()
            .map(|(name, value)| (Key::Text(name), json_value_bytes(value)))
            .collect();

        Ok(Self { entries })
    }
}

fn json_value_bytes(value: Value) -> Bytes {
    match value {
        Value::String(text) => Bytes::from(text),
        Value::Array(items) => match byte_array(&items) {
            Some(bytes) => Bytes::from(bytes),
            None => Bytes::from(Value::Array(items).to_string()),
        },
        other => Bytes::from(other.to_string()),
    }
}

fn byte_array(items: &[Value]) -> Option<Vec<u8>> {
    items
        .iter()
        .map(|item| item.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Writes `data` to `path` atomically.
///
/// The bytes go to `<path>.tmp` first, are synced, and the temp file is then
/// renamed over `path`. Missing parent directories are created.
pub fn write_file(path: &Path, data: &[u8]) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = Path::new(&temp_name);

    let mut file = fs::File::create(temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(temp_path, path)?;
    Ok(())
}

/// Reads and decodes a binary snapshot file.
pub fn read_file(path: &Path) -> Result<Snapshot, SnapshotError> {
    let data = fs::read(path)?;
    Snapshot::decode(&data)
}
