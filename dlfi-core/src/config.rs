//! Configuration surface: `partition_size_mb`,
//! `encryption`, `thumbnail_cache_size_mb`. Persisted as a single JSON row in
//! `db.sqlite`'s `settings` table, not a free-standing file, so it lives in
//! the same store every other piece of durable state lives in.

use crate::db::MetadataStore;
use crate::error::{DlfiError, Result};
use serde::{Deserialize, Serialize};

/// `partition_size_mb: int >= 0 (0 disables)` at the config-surface level;
/// stored here as exact bytes so callers that need sub-megabyte partition
/// sizes (tests, small archives) aren't rounded down to zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfig {
	pub size_bytes: u64,
}

impl PartitionConfig {
	pub fn disabled() -> Self {
		Self { size_bytes: 0 }
	}

	pub fn is_enabled(&self) -> bool {
		self.size_bytes > 0
	}

	pub fn max_size_bytes(&self) -> u64 {
		self.size_bytes
	}
}

impl Default for PartitionConfig {
	fn default() -> Self {
		Self::disabled()
	}
}

/// `encryption: {enabled, algo, kdf_params}`. `kdf_params` is recorded in
/// `keys.json`, not duplicated here; this flag is just whether the
/// archive is currently reading/writing ciphertext.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionConfig {
	pub enabled: bool,
}

impl Default for EncryptionConfig {
	fn default() -> Self {
		Self { enabled: false }
	}
}

/// The persisted config surface, loaded into memory on archive open and
/// written back on every `set_*` operation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ArchiveConfig {
	pub partition: PartitionConfig,
	pub encryption: EncryptionConfig,
	pub thumbnail_cache_size_mb: u64,
}

impl Default for ArchiveConfig {
	fn default() -> Self {
		Self {
			partition: PartitionConfig::default(),
			encryption: EncryptionConfig::default(),
			thumbnail_cache_size_mb: 256,
		}
	}
}

impl ArchiveConfig {
	/// Load the settings row if present, or persist and return the default
	/// on first open.
	pub async fn load_or_init(store: &MetadataStore) -> Result<Self> {
		match store.load_settings_json().await? {
			Some(json) => serde_json::from_str(&json)
				.map_err(|e| DlfiError::Internal(anyhow::anyhow!("corrupt settings row: {e}"))),
			None => {
				let config = Self::default();
				config.save(store).await?;
				Ok(config)
			}
		}
	}

	pub async fn save(&self, store: &MetadataStore) -> Result<()> {
		let json = serde_json::to_string(self)
			.map_err(|e| DlfiError::Internal(anyhow::anyhow!("failed to serialize settings: {e}")))?;
		store.save_settings_json(&json).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::db::migration::Migrator;
	use sea_orm::Database;
	use sea_orm_migration::MigratorTrait;

	async fn test_store() -> MetadataStore {
		let conn = Database::connect("sqlite::memory:").await.unwrap();
		Migrator::up(&conn, None).await.unwrap();
		MetadataStore::new(conn)
	}

	#[tokio::test]
	async fn first_open_persists_defaults() {
		let store = test_store().await;
		let config = ArchiveConfig::load_or_init(&store).await.unwrap();
		assert!(!config.encryption.enabled);
		assert_eq!(config.partition.size_bytes, 0);

		let reloaded = ArchiveConfig::load_or_init(&store).await.unwrap();
		assert_eq!(reloaded.thumbnail_cache_size_mb, config.thumbnail_cache_size_mb);
	}

	#[tokio::test]
	async fn save_then_load_round_trips() {
		let store = test_store().await;
		let mut config = ArchiveConfig::load_or_init(&store).await.unwrap();
		config.partition.size_bytes = 4 * 1024 * 1024;
		config.encryption.enabled = true;
		config.save(&store).await.unwrap();

		let reloaded = ArchiveConfig::load_or_init(&store).await.unwrap();
		assert_eq!(reloaded.partition.size_bytes, 4 * 1024 * 1024);
		assert!(reloaded.encryption.enabled);
	}
}
