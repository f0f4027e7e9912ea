//! Canonical JSON and SHA-256 helpers.
//!
//! These are the only primitives the rest of the workspace uses to compute
//! fingerprints, evidence digests, and audit pointers. Centralizing them
//! here keeps every hash in the system defined against one canonicalization
//! rule: serde_json's key-sorted map serialization.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Failure to canonicalize a value before hashing.
#[derive(Debug, thiserror::Error)]
pub enum CanonicalizeError {
    /// serde_json failed to serialize the value.
    #[error("failed to serialize value for canonicalization: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Serializes `value` to JSON with map keys in sorted order.
///
/// `serde_json::Value`'s `Map` is backed by a `BTreeMap` unless the
/// `preserve_order` feature is enabled (it is not, in this workspace), so a
/// round-trip through `Value` is sufficient to canonicalize key order.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, CanonicalizeError> {
    let as_value = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&as_value)?)
}

/// Returns the lowercase hex SHA-256 digest of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode_digest(hasher.finalize())
}

/// Minimal hex-encoding helper so the crate does not need a `hex` dependency
/// solely for this one call site.
mod hex {
    const LUT: &[u8; 16] = b"0123456789abcdef";

    pub fn encode_digest(digest: impl AsRef<[u8]>) -> String {
        let bytes = digest.as_ref();
        let mut out = String::with_capacity(bytes.len() * 2);
        for byte in bytes {
            out.push(LUT[(byte >> 4) as usize] as char);
            out.push(LUT[(byte & 0x0f) as usize] as char);
        }
        out
    }
}

/// Returns `true` if `s` is exactly 64 lowercase hex characters, the shape
/// required of `file_hash` and `fingerprint_hex`.
pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(is_sha256_hex(&sha256_hex(b"abc")));
    }

    #[test]
    fn canonical_json_sorts_keys() {
        #[derive(Serialize)]
        struct Unordered {
            zebra: i32,
            apple: i32,
        }
        let json = canonical_json(&Unordered { zebra: 1, apple: 2 }).unwrap();
        assert_eq!(json, r#"{"apple":2,"zebra":1}"#);
    }

    #[test]
    fn is_sha256_hex_rejects_wrong_shape() {
        assert!(!is_sha256_hex("abc"));
        assert!(!is_sha256_hex(&"F".repeat(64)));
        assert!(is_sha256_hex(&"a".repeat(64)));
    }
}
