//! Key Hashing
//!
//! Every key is reduced to a 64-bit digest before it is placed in a shard.
//! The digest only has to be deterministic and reasonably spread; it is not
//! cryptographic, and the map always confirms a hit by comparing keys.
//!
//! - Text and byte keys use 32-bit FNV-1a, widened to 64 bits.
//! - Scalar keys (booleans, timestamps, integers, floats) use their bit
//!   pattern directly.

use crate::storage::key::{unix_nanos, Key};

/// FNV-1a 32-bit offset basis.
const FNV_OFFSET_32: u32 = 2_166_136_261;

/// FNV-1a 32-bit prime.
const FNV_PRIME_32: u32 = 16_777_619;

/// Hashes a byte sequence with 32-bit FNV and widens the result.
///
/// The multiply happens before the xor for every byte, which is the exact
/// mixing order existing snapshots were produced with.
#[inline]
pub fn fnv1a_32(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_32;
    for &byte in bytes {
        hash = hash.wrapping_mul(FNV_PRIME_32);
        hash ^= u32::from(byte);
    }
    u64::from(hash)
}

/// Computes the digest used to address a key's shard.
pub fn hash_key(key: &Key) -> u64 {
    match key {
        Key::Text(s) => fnv1a_32(s.as_bytes()),
        Key::Bytes(b) => fnv1a_32(b),
        Key::Bool(b) => u64::from(*b),
        Key::Timestamp(at) => unix_nanos(*at) as u64,
        Key::Int(n) => *n as u64,
        Key::UInt(n) => *n,
        Key::Float(f) => f.to_bits(),
    }
}

/// Maps a digest onto a power-of-two shard array.
#[inline]
pub fn shard_index(hash: u64, capacity: usize) -> usize {
    debug_assert!(capacity.is_power_of_two());
    (hash & (capacity as u64 - 1)) as usize
}
