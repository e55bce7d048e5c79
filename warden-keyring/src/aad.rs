//! Protected-payload header and AAD conventions (locked).
//!
//! Wire header:
//!   magic[4] || key_id[16]
//!
//! AAD (bytes):
//!   magic[4] || key_id[16] || SHA-512( concat_i( u32_be(len(p_i)) || p_i ) )
//!
//! Purposes are length-prefixed before hashing; plain concatenation would
//! conflate ["ab","c"] with ["a","bc"].

use sha2::{Digest, Sha512};
use uuid::Uuid;

/// First four bytes of every protected payload.
pub const MAGIC_HEADER: [u8; 4] = [0x09, 0xF0, 0xC9, 0xF0];

/// Header length: magic plus key id.
pub const HEADER_LEN: usize = MAGIC_HEADER.len() + 16;

/// Purpose digest length (SHA-512).
pub const PURPOSE_DIGEST_LEN: usize = 64;

/// Hash a purpose chain. The empty chain hashes the empty string.
pub fn purpose_digest(purposes: &[String]) -> [u8; PURPOSE_DIGEST_LEN] {
    let mut hasher = Sha512::new();
    for purpose in purposes {
        let bytes = purpose.as_bytes();
        hasher.update((bytes.len() as u32).to_be_bytes());
        hasher.update(bytes);
    }
    let mut out = [0u8; PURPOSE_DIGEST_LEN];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Assemble the AAD for one payload: header bytes plus the purpose digest.
pub fn build_aad(key_id: &Uuid, digest: &[u8; PURPOSE_DIGEST_LEN]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(HEADER_LEN + PURPOSE_DIGEST_LEN);
    aad.extend_from_slice(&MAGIC_HEADER);
    aad.extend_from_slice(key_id.as_bytes());
    aad.extend_from_slice(digest);
    aad
}

/// Write the payload header for `key_id`.
pub fn build_header(key_id: &Uuid) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[..4].copy_from_slice(&MAGIC_HEADER);
    header[4..].copy_from_slice(key_id.as_bytes());
    header
}

/// Parse a payload header, returning the key id.
///
/// `None` covers both truncation and a bad magic value; the caller reports
/// the uniform cryptographic failure either way.
pub fn parse_header(payload: &[u8]) -> Option<Uuid> {
    if payload.len() < HEADER_LEN || payload[..4] != MAGIC_HEADER {
        return None;
    }
    let id: [u8; 16] = payload[4..HEADER_LEN].try_into().ok()?;
    Some(Uuid::from_bytes(id))
}
