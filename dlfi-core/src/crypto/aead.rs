//! Per-blob AEAD envelope: a 256-bit DEK generated at
//! ingest, wrapped by the master key; plaintext encrypted with
//! XChaCha20-Poly1305 under a fresh 192-bit nonce.

use crate::blob::hasher::CHUNK_SIZE;
use crate::crypto::kdf::MasterKey;
use crate::error::{DlfiError, Result};
use chacha20poly1305::{
	aead::{Aead, KeyInit},
	XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const DEK_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
const ENVELOPE_MAGIC: [u8; 4] = *b"DLF1";
const ENVELOPE_VERSION: u8 = 1;
/// AEAD tag length for XChaCha20-Poly1305.
const AEAD_TAG_LEN: usize = 16;
/// `wrap_dek` always seals a fixed `DEK_LEN`-byte plaintext with a fresh
/// nonce, so `WrappedDek`'s length is constant — which makes the envelope
/// header a fixed size too. Key rotation relies on this: it rewrites
/// only this many leading bytes of a blob's ciphertext in place, never
/// touching the body.
pub const WRAPPED_DEK_LEN: usize = NONCE_LEN + DEK_LEN + AEAD_TAG_LEN;
pub const ENVELOPE_LEN: usize = 4 + 1 + NONCE_LEN + 2 + WRAPPED_DEK_LEN;

#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Dek(pub [u8; DEK_LEN]);

pub fn generate_dek() -> Dek {
	let mut key = [0u8; DEK_LEN];
	OsRng.fill_bytes(&mut key);
	Dek(key)
}

/// `wrapped_dek = AEAD_encrypt(MK, per_blob_nonce2, DEK)`, carried as
/// `nonce || ciphertext`.
#[derive(Clone)]
pub struct WrappedDek(pub Vec<u8>);

/// Seal arbitrary bytes under `mk` with a fresh random nonce, nonce
/// prepended to the ciphertext. The shared primitive behind DEK wrapping
/// and the `keys.json` passphrase verifier.
pub fn seal_bytes(mk: &MasterKey, plaintext: &[u8]) -> Result<Vec<u8>> {
	let mut nonce_bytes = [0u8; NONCE_LEN];
	OsRng.fill_bytes(&mut nonce_bytes);
	let cipher = XChaCha20Poly1305::new((&mk.0).into());
	let nonce = XNonce::from_slice(&nonce_bytes);
	let ciphertext = cipher
		.encrypt(nonce, plaintext)
		.map_err(|_| DlfiError::DecryptionFailed)?;
	let mut out = nonce_bytes.to_vec();
	out.extend_from_slice(&ciphertext);
	Ok(out)
}

pub fn open_bytes(mk: &MasterKey, sealed: &[u8]) -> Result<Vec<u8>> {
	if sealed.len() < NONCE_LEN {
		return Err(DlfiError::DecryptionFailed);
	}
	let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
	let cipher = XChaCha20Poly1305::new((&mk.0).into());
	let nonce = XNonce::from_slice(nonce_bytes);
	cipher
		.decrypt(nonce, ciphertext)
		.map_err(|_| DlfiError::DecryptionFailed)
}

pub fn wrap_dek(mk: &MasterKey, dek: &Dek) -> Result<WrappedDek> {
	Ok(WrappedDek(seal_bytes(mk, dek.0.as_slice())?))
}

pub fn unwrap_dek(mk: &MasterKey, wrapped: &WrappedDek) -> Result<Dek> {
	let plaintext = open_bytes(mk, &wrapped.0)?;
	if plaintext.len() != DEK_LEN {
		return Err(DlfiError::DecryptionFailed);
	}
	let mut dek = [0u8; DEK_LEN];
	dek.copy_from_slice(&plaintext);
	Ok(Dek(dek))
}

/// Re-wrap a DEK under a new master key without touching ciphertext bodies
///.
pub fn rewrap_dek(old_mk: &MasterKey, new_mk: &MasterKey, wrapped: &WrappedDek) -> Result<WrappedDek> {
	let dek = unwrap_dek(old_mk, wrapped)?;
	wrap_dek(new_mk, &dek)
}

/// Per-blob cipher: one fresh nonce base and DEK generated at ingest, used
/// to frame-encrypt the plaintext stream in bounded-memory chunks. Each
/// frame's nonce is the base nonce with its last 4 bytes replaced by a
/// big-endian chunk counter, so encryption never needs the full plaintext
/// in memory at once.
pub struct BlobCipher {
	dek: Dek,
	nonce_base: [u8; NONCE_LEN],
}

impl BlobCipher {
	pub fn generate() -> Self {
		let mut nonce_base = [0u8; NONCE_LEN];
		OsRng.fill_bytes(&mut nonce_base);
		Self {
			dek: generate_dek(),
			nonce_base,
		}
	}

	pub fn from_parts(dek: Dek, nonce_base: [u8; NONCE_LEN]) -> Self {
		Self { dek, nonce_base }
	}

	/// Generate a fresh per-blob cipher and immediately wrap its DEK under
	/// `mk`, for ingest-time encryption.
	pub fn generate_with_wrap(mk: &MasterKey) -> Result<(Self, WrappedDek)> {
		let cipher = Self::generate();
		let wrapped = wrap_dek(mk, &cipher.dek)?;
		Ok((cipher, wrapped))
	}

	pub fn nonce_base(&self) -> [u8; NONCE_LEN] {
		self.nonce_base
	}

	fn chunk_nonce(&self, chunk_index: u32) -> XNonce {
		let mut bytes = self.nonce_base;
		bytes[NONCE_LEN - 4..].copy_from_slice(&chunk_index.to_be_bytes());
		*XNonce::from_slice(&bytes)
	}

	pub fn encrypt_chunk(&self, chunk_index: u32, plaintext: &[u8]) -> Result<Vec<u8>> {
		let cipher = XChaCha20Poly1305::new((&self.dek.0).into());
		cipher
			.encrypt(&self.chunk_nonce(chunk_index), plaintext)
			.map_err(|_| DlfiError::DecryptionFailed)
	}

	pub fn decrypt_chunk(&self, chunk_index: u32, ciphertext: &[u8]) -> Result<Vec<u8>> {
		let cipher = XChaCha20Poly1305::new((&self.dek.0).into());
		cipher
			.decrypt(&self.chunk_nonce(chunk_index), ciphertext)
			.map_err(|_| DlfiError::DecryptionFailed)
	}
}

/// Header written before the framed ciphertext, carrying everything needed
/// to decrypt without consulting the metadata store.
pub struct Envelope {
	pub nonce_base: [u8; NONCE_LEN],
	pub wrapped_dek: WrappedDek,
}

impl Envelope {
	pub fn encode(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(4 + 1 + NONCE_LEN + 2 + self.wrapped_dek.0.len());
		out.extend_from_slice(&ENVELOPE_MAGIC);
		out.push(ENVELOPE_VERSION);
		out.extend_from_slice(&self.nonce_base);
		out.extend_from_slice(&(self.wrapped_dek.0.len() as u16).to_be_bytes());
		out.extend_from_slice(&self.wrapped_dek.0);
		out
	}

	/// Returns the decoded envelope and the byte offset where framed
	/// ciphertext begins.
	pub fn decode(bytes: &[u8]) -> Result<(Self, usize)> {
		if bytes.len() < 4 + 1 + NONCE_LEN + 2 || bytes[..4] != ENVELOPE_MAGIC {
			return Err(DlfiError::IntegrityCheckFailed(
				"malformed blob envelope".to_string(),
			));
		}
		if bytes[4] != ENVELOPE_VERSION {
			return Err(DlfiError::IntegrityCheckFailed(format!(
				"unsupported envelope version {}",
				bytes[4]
			)));
		}
		let mut nonce_base = [0u8; NONCE_LEN];
		nonce_base.copy_from_slice(&bytes[5..5 + NONCE_LEN]);
		let len_offset = 5 + NONCE_LEN;
		let dek_len = u16::from_be_bytes([bytes[len_offset], bytes[len_offset + 1]]) as usize;
		let dek_start = len_offset + 2;
		let dek_end = dek_start + dek_len;
		if bytes.len() < dek_end {
			return Err(DlfiError::IntegrityCheckFailed(
				"truncated blob envelope".to_string(),
			));
		}
		let wrapped_dek = WrappedDek(bytes[dek_start..dek_end].to_vec());
		Ok((
			Self {
				nonce_base,
				wrapped_dek,
			},
			dek_end,
		))
	}
}

/// Frame format for the ciphertext region following the envelope header:
/// `[u32 BE length][ciphertext+tag]` repeated until EOF.
pub fn encode_frame(ciphertext: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(4 + ciphertext.len());
	out.extend_from_slice(&(ciphertext.len() as u32).to_be_bytes());
	out.extend_from_slice(ciphertext);
	out
}

pub const FRAME_HEADER_LEN: usize = 4;
/// Upper bound on one frame's ciphertext length: a plaintext chunk plus the
/// Poly1305 tag.
pub const MAX_FRAME_CIPHERTEXT_LEN: usize = CHUNK_SIZE + 16;

#[cfg(test)]
mod tests {
	use super::*;
	use crate::crypto::kdf::{derive_master_key, Argon2Params};

	#[test]
	fn dek_round_trips_through_wrap_unwrap() {
		let mk = derive_master_key("passphrase", &[1u8; 16], Argon2Params::default()).unwrap();
		let dek = generate_dek();
		let original = dek.0;
		let wrapped = wrap_dek(&mk, &dek).unwrap();
		let unwrapped = unwrap_dek(&mk, &wrapped).unwrap();
		assert_eq!(unwrapped.0, original);
	}

	#[test]
	fn wrong_master_key_fails_unwrap() {
		let mk1 = derive_master_key("a", &[1u8; 16], Argon2Params::default()).unwrap();
		let mk2 = derive_master_key("b", &[1u8; 16], Argon2Params::default()).unwrap();
		let dek = generate_dek();
		let wrapped = wrap_dek(&mk1, &dek).unwrap();
		assert!(unwrap_dek(&mk2, &wrapped).is_err());
	}

	#[test]
	fn blob_cipher_round_trips_multiple_chunks() {
		let cipher = BlobCipher::generate();
		let chunk_a = b"hello world, jojo";
		let chunk_b = b"second chunk of plaintext";
		let ct_a = cipher.encrypt_chunk(0, chunk_a).unwrap();
		let ct_b = cipher.encrypt_chunk(1, chunk_b).unwrap();
		assert_eq!(cipher.decrypt_chunk(0, &ct_a).unwrap(), chunk_a);
		assert_eq!(cipher.decrypt_chunk(1, &ct_b).unwrap(), chunk_b);
	}

	#[test]
	fn envelope_round_trips_through_encode_decode() {
		let mk = derive_master_key("p", &[2u8; 16], Argon2Params::default()).unwrap();
		let dek = generate_dek();
		let wrapped = wrap_dek(&mk, &dek).unwrap();
		let envelope = Envelope {
			nonce_base: [9u8; NONCE_LEN],
			wrapped_dek: wrapped,
		};
		let encoded = envelope.encode();
		let (decoded, offset) = Envelope::decode(&encoded).unwrap();
		assert_eq!(decoded.nonce_base, envelope.nonce_base);
		assert_eq!(offset, encoded.len());
	}

	#[test]
	fn envelope_length_is_constant_for_key_rotation() {
		let mk = derive_master_key("p", &[2u8; 16], Argon2Params::default()).unwrap();
		let dek = generate_dek();
		let wrapped = wrap_dek(&mk, &dek).unwrap();
		let envelope = Envelope {
			nonce_base: [1u8; NONCE_LEN],
			wrapped_dek: wrapped,
		};
		assert_eq!(envelope.encode().len(), ENVELOPE_LEN);
	}
}
