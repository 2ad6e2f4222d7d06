// Hashing utilities

use sha2::{Sha256, Digest};
use crate::core::{Hash256, PubkeyHash};

/// Single SHA256 hash, the digest behind transaction ids, block hashes,
/// merkle nodes and proof-of-work
pub fn sha256(data: &[u8]) -> Hash256 {
    let mut result = [0u8; 32];
    result.copy_from_slice(&Sha256::digest(data));
    Hash256(result)
}

/// SHA256(SHA256(data)), used for address checksums
pub fn double_sha256(data: &[u8]) -> Hash256 {
    sha256(sha256(data).as_bytes())
}

/// RIPEMD160(SHA256(data)) - used for address generation
pub fn hash160(data: &[u8]) -> PubkeyHash {
    use ripemd::{Ripemd160, Digest as RipemdDigest};
    let sha = Sha256::digest(data);
    let ripemd = Ripemd160::digest(sha);
    let mut result = [0u8; 20];
    result.copy_from_slice(&ripemd);
    PubkeyHash(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256(b"").to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_double_sha256_differs_from_single() {
        let data = b"hello world";
        assert_ne!(sha256(data), double_sha256(data));
        assert_eq!(double_sha256(data), double_sha256(data));
    }

    #[test]
    fn test_hash160() {
        // hash160 of the empty string
        assert_eq!(
            hash160(b"").to_hex(),
            "b472a266d0bd89c13706a4132ccfb16f7c3b9fcb"
        );
    }
}
