//! Content addressing for history blobs.
//!
//! History entries do not embed their bytes; they reference a row in the
//! history blob table by the blake3 digest of the bytes, so identical
//! content published many times is stored once.

/// blake3 digest of `bytes`, lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(content_hash(b"v1"), content_hash(b"v1"));
        assert_ne!(content_hash(b"v1"), content_hash(b"v2"));
        assert_eq!(content_hash(b"").len(), 64);
    }
}
