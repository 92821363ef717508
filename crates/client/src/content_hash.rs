//! Dropbox content hashing.
//!
//! The service verifies each upload payload against a block hash: the
//! payload is split into 4 MB blocks, each block is SHA-256 hashed, the
//! digests are concatenated, and the SHA-256 of the concatenation is the
//! content hash (lowercase hex).
//!
//! This is a transport checksum over one call's payload. It is unrelated
//! to the resume chain hash kept by the upload driver.

use sha2::{Digest, Sha256};

/// Block size of the content-hash scheme.
pub const CONTENT_HASH_BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Incremental content hasher.
///
/// Feed payload bytes with `update` in any split; `finalize_hex` yields
/// the lowercase hex digest.
pub struct ContentHasher {
    overall: Sha256,
    block: Sha256,
    block_len: usize,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self {
            overall: Sha256::new(),
            block: Sha256::new(),
            block_len: 0,
        }
    }

    /// Feed payload bytes.
    pub fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let room: usize = CONTENT_HASH_BLOCK_SIZE - self.block_len;
            let take: usize = room.min(data.len());
            self.block.update(&data[..take]);
            self.block_len += take;
            data = &data[take..];

            if self.block_len == CONTENT_HASH_BLOCK_SIZE {
                let digest = self.block.finalize_reset();
                self.overall.update(digest);
                self.block_len = 0;
            }
        }
    }

    /// Finish and return the lowercase hex content hash.
    pub fn finalize_hex(mut self) -> String {
        if self.block_len > 0 {
            let digest = self.block.finalize();
            self.overall.update(digest);
        }
        hex::encode(self.overall.finalize())
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Content hash of a complete payload.
pub fn content_hash_hex(data: &[u8]) -> String {
    let mut hasher: ContentHasher = ContentHasher::new();
    hasher.update(data);
    hasher.finalize_hex()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reference implementation: hash whole blocks independently.
    fn reference_hash(data: &[u8]) -> String {
        let mut concatenated: Vec<u8> = Vec::new();
        for block in data.chunks(CONTENT_HASH_BLOCK_SIZE) {
            concatenated.extend_from_slice(&Sha256::digest(block));
        }
        hex::encode(Sha256::digest(&concatenated))
    }

    #[test]
    fn test_single_block_is_double_sha256() {
        let data: &[u8] = b"hello content hash";
        let expected: String = hex::encode(Sha256::digest(Sha256::digest(data)));
        assert_eq!(content_hash_hex(data), expected);
    }

    #[test]
    fn test_empty_payload() {
        // No blocks at all: the outer hash runs over an empty concatenation.
        let expected: String = hex::encode(Sha256::digest([]));
        assert_eq!(content_hash_hex(&[]), expected);
    }

    #[test]
    fn test_multi_block_matches_reference() {
        let data: Vec<u8> = (0..CONTENT_HASH_BLOCK_SIZE + 1234)
            .map(|i| (i % 251) as u8)
            .collect();
        assert_eq!(content_hash_hex(&data), reference_hash(&data));
    }

    #[test]
    fn test_split_feeding_is_equivalent() {
        let data: Vec<u8> = (0..100_000).map(|i| (i % 7) as u8).collect();

        let mut hasher: ContentHasher = ContentHasher::new();
        for piece in data.chunks(317) {
            hasher.update(piece);
        }
        assert_eq!(hasher.finalize_hex(), content_hash_hex(&data));
    }

    #[test]
    fn test_output_is_64_lowercase_hex() {
        let hash: String = content_hash_hex(b"abc");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
