//! Passphrase -> master key derivation: `MK = argon2id(passphrase,
//! salt, t, m, p)`.

use crate::error::{DlfiError, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const SALT_LEN: usize = 16;
pub const MK_LEN: usize = 32;

/// `argon2id` cost parameters recorded alongside the salt in `keys.json` so
/// a future derivation with the same passphrase reproduces the same key.
#[derive(Clone, Copy, Debug)]
pub struct Argon2Params {
	pub t_cost: u32,
	pub m_cost_kib: u32,
	pub p_cost: u32,
}

impl Default for Argon2Params {
	fn default() -> Self {
		// Interactive-use defaults; a desktop archive open shouldn't make the
		// user wait seconds, but should still cost an attacker meaningfully.
		Self {
			t_cost: 3,
			m_cost_kib: 64 * 1024,
			p_cost: 1,
		}
	}
}

/// Master key derived from a passphrase. Zeroized on drop; never logged or
/// included in error messages.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey(pub [u8; MK_LEN]);

pub fn generate_salt() -> [u8; SALT_LEN] {
	let mut salt = [0u8; SALT_LEN];
	OsRng.fill_bytes(&mut salt);
	salt
}

pub fn derive_master_key(
	passphrase: &str,
	salt: &[u8],
	params: Argon2Params,
) -> Result<MasterKey> {
	let argon2_params = Params::new(
		params.m_cost_kib,
		params.t_cost,
		params.p_cost,
		Some(MK_LEN),
	)
	.map_err(|e| DlfiError::Internal(anyhow::anyhow!("invalid argon2 params: {e}")))?;
	let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

	let mut out = [0u8; MK_LEN];
	argon2
		.hash_password_into(passphrase.as_bytes(), salt, &mut out)
		.map_err(|e| DlfiError::Internal(anyhow::anyhow!("argon2id derivation failed: {e}")))?;
	Ok(MasterKey(out))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn derivation_is_deterministic_for_same_inputs() {
		let salt = [7u8; SALT_LEN];
		let params = Argon2Params {
			t_cost: 2,
			m_cost_kib: 8 * 1024,
			p_cost: 1,
		};
		let a = derive_master_key("correct horse battery staple", &salt, params).unwrap();
		let b = derive_master_key("correct horse battery staple", &salt, params).unwrap();
		assert_eq!(a.0, b.0);
	}

	#[test]
	fn different_passphrases_derive_different_keys() {
		let salt = [7u8; SALT_LEN];
		let params = Argon2Params {
			t_cost: 2,
			m_cost_kib: 8 * 1024,
			p_cost: 1,
		};
		let a = derive_master_key("hunter2", &salt, params).unwrap();
		let b = derive_master_key("hunter3", &salt, params).unwrap();
		assert_ne!(a.0, b.0);
	}
}
