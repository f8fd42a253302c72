//! Streams plaintext bytes into a running SHA-256 digest in fixed-size
//! chunks, so ingest never buffers a whole file in memory.

use sha2::{Digest, Sha256};

/// Read chunk size for ingest hashing and for chunked AEAD framing.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Accumulates a running SHA-256 digest over bytes passed to `update`.
pub struct StreamHasher {
	inner: Sha256,
	len: u64,
}

impl StreamHasher {
	pub fn new() -> Self {
		Self {
			inner: Sha256::new(),
			len: 0,
		}
	}

	pub fn update(&mut self, chunk: &[u8]) {
		self.inner.update(chunk);
		self.len += chunk.len() as u64;
	}

	pub fn finalize(self) -> (String, u64) {
		let digest = self.inner.finalize();
		(hex::encode(digest), self.len)
	}
}

impl Default for StreamHasher {
	fn default() -> Self {
		Self::new()
	}
}

/// The well-known SHA-256 of the empty byte string.
pub fn empty_hash() -> String {
	StreamHasher::new().finalize().0
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_hash_matches_known_sha256() {
		assert_eq!(
			empty_hash(),
			"e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
		);
	}

	#[test]
	fn hasher_matches_sha2_directly() {
		let mut h = StreamHasher::new();
		h.update(b"hello world, jojo");
		let (hash, len) = h.finalize();
		assert_eq!(len, 17);
		let mut direct = Sha256::new();
		direct.update(b"hello world, jojo");
		assert_eq!(hash, hex::encode(direct.finalize()));
	}
}
