//! Crypto / key management.

pub mod aead;
pub mod kdf;

pub use aead::{BlobCipher, Dek, Envelope, WrappedDek};
pub use kdf::{Argon2Params, MasterKey};

use crate::error::{DlfiError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

const VERIFIER_PLAINTEXT: &[u8] = b"dlfi-key-verifier-v1";

/// `{algo:"argon2id", salt, t, m, p, verifier}`. `verifier` is an
/// AEAD-encrypted fixed plaintext used to detect a wrong passphrase without
/// trying to decrypt real blob data first.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyFile {
	pub algo: String,
	#[serde(with = "hex_bytes")]
	pub salt: Vec<u8>,
	pub t: u32,
	pub m: u32,
	pub p: u32,
	#[serde(with = "hex_bytes")]
	pub verifier: Vec<u8>,
}

mod hex_bytes {
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
		s.serialize_str(&hex::encode(bytes))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
		let s = String::deserialize(d)?;
		hex::decode(s).map_err(serde::de::Error::custom)
	}
}

impl KeyFile {
	/// Derive a fresh key file + master key from a new passphrase.
	pub fn create(passphrase: &str, params: Argon2Params) -> Result<(Self, MasterKey)> {
		let salt = kdf::generate_salt();
		let mk = kdf::derive_master_key(passphrase, &salt, params)?;
		let verifier = aead::seal_bytes(&mk, VERIFIER_PLAINTEXT)?;
		Ok((
			Self {
				algo: "argon2id".to_string(),
				salt: salt.to_vec(),
				t: params.t_cost,
				m: params.m_cost_kib,
				p: params.p_cost,
				verifier,
			},
			mk,
		))
	}

	/// Re-derive `MK` from a candidate passphrase and check it against the
	/// verifier; fails closed with `DecryptionFailed` on mismatch.
	pub fn unlock(&self, passphrase: &str) -> Result<MasterKey> {
		let params = Argon2Params {
			t_cost: self.t,
			m_cost_kib: self.m,
			p_cost: self.p,
		};
		let mk = kdf::derive_master_key(passphrase, &self.salt, params)?;
		let plaintext = aead::open_bytes(&mk, &self.verifier)?;
		if plaintext != VERIFIER_PLAINTEXT {
			return Err(DlfiError::DecryptionFailed);
		}
		Ok(mk)
	}

	pub async fn load(path: &Path) -> Result<Option<Self>> {
		match fs::read(path).await {
			Ok(bytes) => {
				let key_file = serde_json::from_slice(&bytes)
					.map_err(|e| DlfiError::Internal(anyhow::anyhow!("corrupt keys.json: {e}")))?;
				Ok(Some(key_file))
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	/// Atomic write via temp-file-then-rename.
	pub async fn save(&self, path: &Path) -> Result<()> {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent).await?;
		}
		let temp_path = path.with_extension("json.tmp");
		let json = serde_json::to_vec_pretty(self)
			.map_err(|e| DlfiError::Internal(anyhow::anyhow!("failed to serialize keys.json: {e}")))?;
		fs::write(&temp_path, json).await?;
		fs::rename(&temp_path, path).await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unlock_succeeds_with_correct_passphrase() {
		let (key_file, _mk) = KeyFile::create("hunter2", Argon2Params::default()).unwrap();
		assert!(key_file.unlock("hunter2").is_ok());
	}

	#[test]
	fn unlock_fails_closed_with_wrong_passphrase() {
		let (key_file, _mk) = KeyFile::create("hunter2", Argon2Params::default()).unwrap();
		assert!(matches!(
			key_file.unlock("wrong"),
			Err(DlfiError::DecryptionFailed)
		));
	}
}
