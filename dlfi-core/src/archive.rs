//! `Archive`: the top-level handle a caller opens. Owns the
//! database connection, blob store, crypto state, and the process file
//! lock, and implements the external operations surface end to end.

use crate::blob::{BlobStore, StorageMode};
use crate::cancel::{self, Cancellation};
use crate::config::ArchiveConfig;
use crate::crypto::aead::{self, Envelope};
use crate::crypto::kdf::Argon2Params;
use crate::crypto::{BlobCipher, KeyFile, MasterKey};
use crate::db::{self, MetadataStore, NodeSummary, UpdateNodePatch};
use crate::error::{DlfiError, Result};
use crate::export::{self, ExportReport};
use crate::extractor::{self, DiscoveryStream, ExtractionReport};
use crate::ingest;
use crate::lock::ArchiveLock;
use crate::path::NodeId;
use crate::query::{self, Suggestion};
use serde_json::Value;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncRead;
use tracing::instrument;

/// Result of a `vacuum()` pass.
#[derive(Clone, Debug, Default)]
pub struct VacuumReport {
	pub loose_blobs_removed: u64,
	/// Tombstoned blobs physically reclaimed by rewriting their sealed
	/// partition file.
	pub partitioned_blobs_removed: u64,
	/// Tombstoned blobs still sitting in the partition the writer is
	/// currently appending to; reclaimed on a future `vacuum()` once that
	/// partition seals (rolls over to the next one).
	pub partitioned_blobs_pending: u64,
	pub incomplete_temp_files_removed: u64,
}

pub struct Archive {
	dlfi_dir: PathBuf,
	metadata: MetadataStore,
	blobs: BlobStore,
	config: ArchiveConfig,
	_lock: ArchiveLock,
	mk: Option<MasterKey>,
}

impl Archive {
	/// Open (creating if absent) the archive rooted at `archive_root`. A
	/// second process opening the same root fails with `ArchiveBusy`.
	/// `passphrase` unlocks an already-encrypted archive; it is ignored (and
	/// may be `None`) for a plain one.
	#[instrument(skip(passphrase))]
	pub async fn open(archive_root: &Path, passphrase: Option<&str>) -> Result<Self> {
		let dlfi_dir = archive_root.join(".dlfi");
		fs::create_dir_all(&dlfi_dir).await?;
		let lock = ArchiveLock::acquire(&dlfi_dir)?;

		let conn = db::open(&dlfi_dir.join("db.sqlite")).await?;
		let metadata = MetadataStore::new(conn);
		let config = ArchiveConfig::load_or_init(&metadata).await?;

		let keys_path = dlfi_dir.join("keys.json");
		let key_file = KeyFile::load(&keys_path).await?;
		let mk = match (&key_file, passphrase) {
			(Some(kf), Some(pass)) => Some(kf.unlock(pass)?),
			(Some(_), None) if config.encryption.enabled => return Err(DlfiError::DecryptionFailed),
			_ => None,
		};

		let mode = if config.partition.is_enabled() {
			StorageMode::Partitioned {
				max_size: config.partition.max_size_bytes(),
			}
		} else {
			StorageMode::Loose
		};
		let resume_from = Self::partition_resume_point(&dlfi_dir).await?;
		let blobs = BlobStore::open(&dlfi_dir, mode, resume_from).await?;
		blobs.sweep_incomplete().await?;

		Ok(Self {
			dlfi_dir,
			metadata,
			blobs,
			config,
			_lock: lock,
			mk,
		})
	}

	/// Highest `(partition_id, file_len)` already on disk, so a reopened
	/// partitioned archive appends rather than silently overwriting.
	async fn partition_resume_point(dlfi_dir: &Path) -> Result<(u32, u64)> {
		let storage_root = dlfi_dir.join("storage");
		let mut highest: Option<(u32, u64)> = None;
		let mut entries = match fs::read_dir(&storage_root).await {
			Ok(e) => e,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((0, 0)),
			Err(e) => return Err(e.into()),
		};
		while let Some(entry) = entries.next_entry().await? {
			let name = entry.file_name();
			let name = name.to_string_lossy();
			let Some(rest) = name.strip_prefix("part_") else {
				continue;
			};
			let Some(id_str) = rest.strip_suffix(".dat") else {
				continue;
			};
			let Ok(id) = id_str.parse::<u32>() else {
				continue;
			};
			let len = entry.metadata().await?.len();
			let is_new_highest = match highest {
				Some((hid, _)) => id >= hid,
				None => true,
			};
			if is_new_highest {
				highest = Some((id, len));
			}
		}
		Ok(highest.unwrap_or((0, 0)))
	}

	pub fn config(&self) -> &ArchiveConfig {
		&self.config
	}

	/// Direct access to the metadata store, for callers that need lower-level
	/// introspection (blob index rows, ref counts) than the node/file facade
	/// above exposes.
	pub fn metadata(&self) -> &MetadataStore {
		&self.metadata
	}

	// ---- namespace -----------------------------------------------------

	#[instrument(skip(self))]
	pub async fn create_vault(&self, path: &str) -> Result<NodeId> {
		self.metadata.create_vault(path).await
	}

	#[instrument(skip(self, metadata))]
	pub async fn create_record(&self, path: &str, metadata: Value) -> Result<NodeId> {
		self.metadata.create_record(path, metadata).await
	}

	#[instrument(skip(self, patch))]
	pub async fn update_node(&self, uuid: NodeId, patch: UpdateNodePatch) -> Result<()> {
		self.metadata.update_node(uuid, patch).await
	}

	#[instrument(skip(self, patch))]
	pub async fn merge_metadata(&self, uuid: NodeId, patch: Value) -> Result<()> {
		self.metadata.merge_metadata(uuid, patch).await
	}

	#[instrument(skip(self))]
	pub async fn delete(&self, uuid: NodeId) -> Result<Vec<NodeId>> {
		self.metadata.delete(uuid).await
	}

	#[instrument(skip(self, uuids, cancellation))]
	pub async fn bulk_delete(
		&self,
		uuids: &[NodeId],
		cancellation: &Cancellation,
	) -> Vec<Result<Vec<NodeId>>> {
		self.metadata.bulk_delete(uuids, cancellation).await
	}

	#[instrument(skip(self))]
	pub async fn link(&self, source: NodeId, target: NodeId, relation: &str) -> Result<()> {
		self.metadata.link(source, target, relation).await
	}

	#[instrument(skip(self))]
	pub async fn unlink(&self, source: NodeId, target: NodeId, relation: &str, idempotent: bool) -> Result<()> {
		self.metadata.unlink(source, target, relation, idempotent).await
	}

	#[instrument(skip(self))]
	pub async fn add_tag(&self, uuid: NodeId, value: &str) -> Result<()> {
		self.metadata.add_tag(uuid, value).await
	}

	#[instrument(skip(self))]
	pub async fn remove_tag(&self, uuid: NodeId, value: &str) -> Result<()> {
		self.metadata.remove_tag(uuid, value).await
	}

	pub async fn node(&self, uuid: NodeId) -> Result<NodeSummary> {
		self.metadata.get_node(uuid).await
	}

	pub async fn resolve(&self, path: &str) -> Result<NodeId> {
		self.metadata.resolve(path).await
	}

	// ---- files -----------------------------------------------------

	/// Ingest `reader`'s bytes through the blob store and bind them to
	/// `record_uuid`. Encrypts with a fresh per-blob DEK when
	/// the archive's encryption is enabled.
	#[instrument(skip(self, reader))]
	pub async fn append_file(
		&self,
		record_uuid: NodeId,
		display_name: &str,
		reader: impl AsyncRead + Unpin,
	) -> Result<()> {
		let wrap = self.fresh_cipher()?;
		let cipher_ref = wrap.as_ref().map(|(c, w)| (c, w));
		let result = ingest::put(&self.metadata, &self.blobs, cipher_ref, reader).await?;
		self.metadata
			.append_file(record_uuid, display_name, &result.hash, result.new_blob)
			.await
	}

	#[instrument(skip(self))]
	pub async fn remove_file(&self, record_uuid: NodeId, position: i32) -> Result<()> {
		self.metadata.remove_file(record_uuid, position).await
	}

	/// Read a blob back out in plaintext. Materializes it as one buffer
	/// rather than a true async stream — see DESIGN.md.
	#[instrument(skip(self))]
	pub async fn open_blob(&self, hash: &str) -> Result<Vec<u8>> {
		let row = self
			.metadata
			.blob_index_get(hash)
			.await?
			.ok_or_else(|| DlfiError::BlobMissing(hash.to_string()))?;
		self.blobs
			.get(hash, row.partition_location.as_deref(), row.encrypted, self.mk.as_ref())
			.await
	}

	fn fresh_cipher(&self) -> Result<Option<(BlobCipher, crate::crypto::WrappedDek)>> {
		if !self.config.encryption.enabled {
			return Ok(None);
		}
		let mk = self.mk.as_ref().ok_or(DlfiError::DecryptionFailed)?;
		Ok(Some(BlobCipher::generate_with_wrap(mk)?))
	}

	// ---- extractor host -----------------------------------------------

	#[instrument(skip(self, stream))]
	pub async fn run_extractor(&self, stream: DiscoveryStream) -> Result<ExtractionReport> {
		extractor::run(&self.metadata, &self.blobs, self.mk.as_ref(), stream).await
	}

	// ---- query -----------------------------------------------------

	pub async fn query(&self, text: &str) -> Result<Vec<NodeSummary>> {
		query::execute(&self.metadata, text).await
	}

	pub async fn autocomplete(&self, text: &str, cursor: usize) -> Result<Vec<Suggestion>> {
		query::autocomplete(&self.metadata, text, cursor).await
	}

	// ---- export -----------------------------------------------------

	#[instrument(skip(self, cancellation))]
	pub async fn export(&self, out_dir: &Path, cancellation: &Cancellation) -> Result<ExportReport> {
		export::export(&self.metadata, &self.blobs, self.mk.as_ref(), out_dir, cancellation).await
	}

	// ---- crypto & config -----------------------------------------------

	/// Enable or disable encryption for the whole archive. Enabling
	/// re-encrypts every existing blob under a fresh per-blob DEK; disabling
	/// decrypts every blob back to plaintext. Both walk the blob index in
	/// cancellable chunks.
	#[instrument(skip(self, passphrase, cancellation))]
	pub async fn set_encryption(&mut self, passphrase: Option<&str>, cancellation: &Cancellation) -> Result<()> {
		match passphrase {
			Some(pass) => {
				if self.config.encryption.enabled {
					return Err(DlfiError::InvalidPath(
						"encryption already enabled; use change_passphrase to rotate".into(),
					));
				}
				let (key_file, mk) = KeyFile::create(pass, Argon2Params::default())?;
				let rows = self.metadata.all_blobs().await?;
				for (i, row) in rows.iter().enumerate() {
					if i % 32 == 0 {
						cancel::check(cancellation)?;
					}
					let plaintext = self
						.blobs
						.get(&row.hash, row.partition_location.as_deref(), false, None)
						.await?;
					let (cipher, wrapped) = BlobCipher::generate_with_wrap(&mk)?;
					let staged = self.blobs.stage(Cursor::new(plaintext)).await?;
					let new_location = self.blobs.promote(staged, Some((&cipher, &wrapped))).await?;
					self.metadata.blob_update_location(&row.hash, true, new_location).await?;
				}
				key_file.save(&self.dlfi_dir.join("keys.json")).await?;
				self.mk = Some(mk);
				self.config.encryption.enabled = true;
				self.config.save(&self.metadata).await?;
				Ok(())
			}
			None => {
				if !self.config.encryption.enabled {
					return Ok(());
				}
				let mk = self
					.mk
					.take()
					.ok_or(DlfiError::DecryptionFailed)?;
				let rows = self.metadata.all_blobs().await?;

				// Fail closed: decrypt every blob before committing any
				// change, so a single corrupt/tampered blob aborts the whole
				// operation with the archive left exactly as it was.
				let mut plaintexts = Vec::with_capacity(rows.len());
				for (i, row) in rows.iter().enumerate() {
					if i % 32 == 0 {
						cancel::check(cancellation)?;
					}
					let plaintext = self
						.blobs
						.get(&row.hash, row.partition_location.as_deref(), true, Some(&mk))
						.await?;
					plaintexts.push(plaintext);
				}

				for (i, (row, plaintext)) in rows.iter().zip(plaintexts).enumerate() {
					if i % 32 == 0 {
						cancel::check(cancellation)?;
					}
					let staged = self.blobs.stage(Cursor::new(plaintext)).await?;
					let new_location = self.blobs.promote(staged, None).await?;
					self.metadata.blob_update_location(&row.hash, false, new_location).await?;
				}

				let _ = fs::remove_file(self.dlfi_dir.join("keys.json")).await;
				self.config.encryption.enabled = false;
				self.config.save(&self.metadata).await?;
				Ok(())
			}
		}
	}

	/// Rotate the passphrase without touching ciphertext bodies: the
	/// DEK of every encrypted blob is unwrapped under the old MK and
	/// rewrapped under the new one, and only the fixed-length envelope
	/// header is rewritten in place.
	#[instrument(skip(self, old, new, cancellation))]
	pub async fn change_passphrase(&mut self, old: &str, new: &str, cancellation: &Cancellation) -> Result<()> {
		if !self.config.encryption.enabled {
			return Err(DlfiError::InvalidPath("encryption is not enabled".into()));
		}
		let keys_path = self.dlfi_dir.join("keys.json");
		let key_file = KeyFile::load(&keys_path)
			.await?
			.ok_or(DlfiError::DecryptionFailed)?;
		let old_mk = key_file.unlock(old)?;
		let (new_key_file, new_mk) = KeyFile::create(new, Argon2Params::default())?;

		let rows = self.metadata.all_blobs().await?;
		for (i, row) in rows.iter().enumerate() {
			if i % 32 == 0 {
				cancel::check(cancellation)?;
			}
			if !row.encrypted {
				continue;
			}
			let envelope = self
				.blobs
				.read_envelope(&row.hash, row.partition_location.as_deref())
				.await?;
			let rewrapped = aead::rewrap_dek(&old_mk, &new_mk, &envelope.wrapped_dek)?;
			let new_envelope = Envelope {
				nonce_base: envelope.nonce_base,
				wrapped_dek: rewrapped,
			};
			self.blobs
				.rewrite_envelope_header(&row.hash, row.partition_location.as_deref(), &new_envelope.encode())
				.await?;
		}

		new_key_file.save(&keys_path).await?;
		self.mk = Some(new_mk);
		Ok(())
	}

	/// Change the partition size for blobs ingested from now on. `0` disables partitioning (switches to loose mode for
	/// future writes). Existing blobs keep whatever layout they were
	/// ingested under.
	#[instrument(skip(self))]
	pub async fn set_partition_size(&mut self, bytes: u64) -> Result<()> {
		self.config.partition.size_bytes = bytes;
		self.config.save(&self.metadata).await?;

		let mode = if self.config.partition.is_enabled() {
			StorageMode::Partitioned {
				max_size: self.config.partition.max_size_bytes(),
			}
		} else {
			StorageMode::Loose
		};
		let resume_from = Self::partition_resume_point(&self.dlfi_dir).await?;
		self.blobs = BlobStore::open(&self.dlfi_dir, mode, resume_from).await?;
		Ok(())
	}

	/// Physically reclaim tombstoned blobs and crash-recovery temp files.
	///
	/// Loose-mode blobs are unlinked directly. Partition-mode blobs are
	/// reclaimed by compacting whichever sealed partitions hold a
	/// tombstone: every surviving blob in that partition is rewritten into
	/// a fresh file (dropping the tombstoned slots), the rewrite is renamed
	/// over the original, and each survivor's index row is updated to its
	/// new offset. The partition the writer is currently appending to is
	/// never compacted here — rewriting it would desync the writer's
	/// tracked append cursor from the file's real length — so a tombstone
	/// in the live partition stays `pending` until it seals.
	#[instrument(skip(self, cancellation))]
	pub async fn vacuum(&self, cancellation: &Cancellation) -> Result<VacuumReport> {
		let mut report = VacuumReport::default();
		let live_partition = self.blobs.current_partition_id().await;
		let tombstoned = self.metadata.tombstoned_blobs().await?;

		let mut sealed_partitions_with_tombstones: std::collections::BTreeSet<u32> = Default::default();
		for (i, row) in tombstoned.iter().enumerate() {
			if i % 32 == 0 {
				cancel::check(cancellation)?;
			}
			match &row.partition_location {
				None => {
					self.blobs.remove_loose(&row.hash).await?;
					self.metadata.blob_index_remove(&row.hash).await?;
					report.loose_blobs_removed += 1;
				}
				Some(loc) => {
					let parsed = crate::db::entities::blob::PartitionLocation::parse(loc)
						.ok_or_else(|| DlfiError::IntegrityCheckFailed(format!("malformed partition location {loc}")))?;
					if Some(parsed.partition_id) == live_partition {
						report.partitioned_blobs_pending += 1;
					} else {
						sealed_partitions_with_tombstones.insert(parsed.partition_id);
					}
				}
			}
		}

		for (i, partition_id) in sealed_partitions_with_tombstones.iter().enumerate() {
			if i % 4 == 0 {
				cancel::check(cancellation)?;
			}
			let removed = self.compact_sealed_partition(*partition_id).await?;
			report.partitioned_blobs_removed += removed;
		}

		report.incomplete_temp_files_removed = self.blobs.sweep_incomplete().await?;
		Ok(report)
	}

	/// Rewrite one sealed partition, dropping its tombstoned blobs. Returns
	/// the number of blobs physically reclaimed.
	async fn compact_sealed_partition(&self, partition_id: u32) -> Result<u64> {
		use crate::db::entities::blob::PartitionLocation;

		let all = self.metadata.all_blobs().await?;
		let mut surviving = Vec::new();
		let mut tombstoned_in_partition = Vec::new();
		for row in all {
			let Some(loc) = row.partition_location.as_deref().and_then(PartitionLocation::parse) else {
				continue;
			};
			if loc.partition_id != partition_id {
				continue;
			}
			if row.tombstoned {
				tombstoned_in_partition.push(row.hash);
			} else {
				surviving.push((row.hash, loc));
			}
		}

		if tombstoned_in_partition.is_empty() {
			return Ok(0);
		}

		let relocated = self.blobs.compact_partition(partition_id, &surviving).await?;
		for (hash, new_loc) in &relocated {
			let row = self
				.metadata
				.blob_index_get(hash)
				.await?
				.ok_or_else(|| DlfiError::BlobMissing(hash.clone()))?;
			self.metadata
				.blob_update_location(hash, row.encrypted, Some(new_loc.encode()))
				.await?;
		}
		for hash in &tombstoned_in_partition {
			self.metadata.blob_index_remove(hash).await?;
		}
		Ok(tombstoned_in_partition.len() as u64)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cancel::Cancellation;
	use serde_json::json;

	#[tokio::test]
	async fn create_and_resolve_round_trips() {
		let dir = tempfile::tempdir().unwrap();
		let archive = Archive::open(dir.path(), None).await.unwrap();
		let uuid = archive.create_record("library/manga/jojo-ch1", json!({"title": "Ch1"})).await.unwrap();
		assert_eq!(archive.resolve("library/manga/jojo-ch1").await.unwrap(), uuid);
	}

	#[tokio::test]
	async fn append_file_and_open_blob_round_trips_plaintext() {
		let dir = tempfile::tempdir().unwrap();
		let archive = Archive::open(dir.path(), None).await.unwrap();
		let record = archive.create_record("r", json!({})).await.unwrap();
		let data = b"hello, jojo".to_vec();
		archive
			.append_file(record, "page1.png", Cursor::new(data.clone()))
			.await
			.unwrap();

		let files = archive.metadata.list_files(record).await.unwrap();
		assert_eq!(files.len(), 1);
		let bytes = archive.open_blob(&files[0].blob_hash).await.unwrap();
		assert_eq!(bytes, data);
	}

	#[tokio::test]
	async fn second_open_of_same_root_is_archive_busy() {
		let dir = tempfile::tempdir().unwrap();
		let _first = Archive::open(dir.path(), None).await.unwrap();
		let second = Archive::open(dir.path(), None).await;
		assert!(matches!(second, Err(DlfiError::ArchiveBusy)));
	}

	#[tokio::test]
	async fn enabling_then_disabling_encryption_round_trips_a_file() {
		let dir = tempfile::tempdir().unwrap();
		let mut archive = Archive::open(dir.path(), None).await.unwrap();
		let record = archive.create_record("r", json!({})).await.unwrap();
		let data = b"plaintext before encryption".to_vec();
		archive
			.append_file(record, "a.bin", Cursor::new(data.clone()))
			.await
			.unwrap();

		let token = Cancellation::new();
		archive.set_encryption(Some("hunter2"), &token).await.unwrap();
		let files = archive.metadata.list_files(record).await.unwrap();
		let bytes = archive.open_blob(&files[0].blob_hash).await.unwrap();
		assert_eq!(bytes, data);

		archive.set_encryption(None, &token).await.unwrap();
		let bytes = archive.open_blob(&files[0].blob_hash).await.unwrap();
		assert_eq!(bytes, data);
	}

	#[tokio::test]
	async fn change_passphrase_preserves_plaintext() {
		let dir = tempfile::tempdir().unwrap();
		let mut archive = Archive::open(dir.path(), None).await.unwrap();
		let record = archive.create_record("r", json!({})).await.unwrap();
		let data = b"rotate me".to_vec();
		archive
			.append_file(record, "a.bin", Cursor::new(data.clone()))
			.await
			.unwrap();

		let token = Cancellation::new();
		archive.set_encryption(Some("old-pass"), &token).await.unwrap();
		archive.change_passphrase("old-pass", "new-pass", &token).await.unwrap();

		let files = archive.metadata.list_files(record).await.unwrap();
		let bytes = archive.open_blob(&files[0].blob_hash).await.unwrap();
		assert_eq!(bytes, data);
	}

	#[tokio::test]
	async fn vacuum_removes_a_loose_tombstoned_blob() {
		let dir = tempfile::tempdir().unwrap();
		let archive = Archive::open(dir.path(), None).await.unwrap();
		let record = archive.create_record("r", json!({})).await.unwrap();
		archive
			.append_file(record, "a.bin", Cursor::new(b"bye".to_vec()))
			.await
			.unwrap();
		let files = archive.metadata.list_files(record).await.unwrap();
		let hash = files[0].blob_hash.clone();

		archive.remove_file(record, 0).await.unwrap();
		let token = Cancellation::new();
		let report = archive.vacuum(&token).await.unwrap();
		assert_eq!(report.loose_blobs_removed, 1);
		assert!(archive.metadata.blob_index_get(&hash).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn vacuum_compacts_a_sealed_partition_and_keeps_survivors_readable() {
		let dir = tempfile::tempdir().unwrap();
		let mut archive = Archive::open(dir.path(), None).await.unwrap();
		archive.set_partition_size(4096).await.unwrap();

		let record = archive.create_record("r", json!({})).await.unwrap();
		// Two 2 KiB blobs fill the first 4 KiB partition; a third rolls
		// over into a second one, sealing the first.
		archive
			.append_file(record, "a.bin", Cursor::new(vec![1u8; 2048]))
			.await
			.unwrap();
		archive
			.append_file(record, "b.bin", Cursor::new(vec![2u8; 2048]))
			.await
			.unwrap();
		archive
			.append_file(record, "c.bin", Cursor::new(vec![3u8; 2048]))
			.await
			.unwrap();

		let files = archive.metadata.list_files(record).await.unwrap();
		let hash_a = files[0].blob_hash.clone();
		let hash_b = files[1].blob_hash.clone();

		// Drop "a"'s only binding; "b" survives in the same sealed partition.
		archive.remove_file(record, 0).await.unwrap();

		let token = Cancellation::new();
		let report = archive.vacuum(&token).await.unwrap();
		assert_eq!(report.partitioned_blobs_removed, 1);
		assert_eq!(report.partitioned_blobs_pending, 0);
		assert!(archive.metadata.blob_index_get(&hash_a).await.unwrap().is_none());

		let bytes = archive.open_blob(&hash_b).await.unwrap();
		assert_eq!(bytes, vec![2u8; 2048]);
	}
}
