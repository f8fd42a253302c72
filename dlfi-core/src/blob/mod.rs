//! Content-addressable blob store.

pub mod hasher;
pub mod loose;
pub mod partition;

use crate::crypto::aead::{self, BlobCipher, Envelope, WrappedDek, FRAME_HEADER_LEN};
use crate::crypto::MasterKey;
use crate::db::entities::blob::PartitionLocation;
use crate::error::{DlfiError, Result};
use hasher::{StreamHasher, CHUNK_SIZE};
use partition::PartitionWriter;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;

/// Chosen once at archive-open time from `ArchiveConfig`; switching modes
/// live is out of scope (see DESIGN.md) — changing it takes a fresh open.
pub enum StorageMode {
	Loose,
	Partitioned { max_size: u64 },
}

/// Result of streaming a reader into a temp file while hashing.
pub struct StagedBlob {
	pub hash: String,
	pub size: u64,
	pub temp_path: PathBuf,
}

enum Backend {
	Loose,
	Partitioned(PartitionWriter),
}

pub struct BlobStore {
	storage_root: PathBuf,
	temp_root: PathBuf,
	backend: Backend,
	/// Process-level mutex guarding writes, distinct from the
	/// metadata store's own writer mutex — this one only needs to hold for
	/// the filesystem promote step.
	write_lock: AsyncMutex<()>,
}

impl BlobStore {
	/// `resume_from` is only consulted in partitioned mode, to pick up the
	/// append cursor where a prior session left off.
	pub async fn open(
		archive_dir: &Path,
		mode: StorageMode,
		resume_from: (u32, u64),
	) -> Result<Self> {
		let storage_root = archive_dir.join("storage");
		let temp_root = archive_dir.join("temp");
		fs::create_dir_all(&storage_root).await?;
		fs::create_dir_all(&temp_root).await?;

		let backend = match mode {
			StorageMode::Loose => Backend::Loose,
			StorageMode::Partitioned { max_size } => {
				Backend::Partitioned(PartitionWriter::new(storage_root.clone(), max_size, resume_from))
			}
		};

		Ok(Self {
			storage_root,
			temp_root,
			backend,
			write_lock: AsyncMutex::new(()),
		})
	}

	/// Stream `reader` into a `.incomplete` temp file, hashing as it goes.
	/// Leaves the temp file in place; callers must `promote` or `discard`.
	pub async fn stage(&self, mut reader: impl AsyncRead + Unpin) -> Result<StagedBlob> {
		let temp_path = self.temp_root.join(format!("{}.incomplete", uuid::Uuid::new_v4()));
		let mut file = File::create(&temp_path).await?;
		let mut hasher = StreamHasher::new();
		let mut buf = vec![0u8; CHUNK_SIZE];
		loop {
			let n = reader.read(&mut buf).await?;
			if n == 0 {
				break;
			}
			hasher.update(&buf[..n]);
			file.write_all(&buf[..n]).await?;
		}
		file.sync_all().await?;
		let (hash, size) = hasher.finalize();
		Ok(StagedBlob {
			hash,
			size,
			temp_path,
		})
	}

	pub async fn discard(&self, staged: &StagedBlob) -> Result<()> {
		match fs::remove_file(&staged.temp_path).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}

	/// Commit a staged blob into its final location. When `cipher` is
	/// `Some`, the plaintext temp file is re-read and frame-encrypted into
	/// the destination rather than simply moved. Returns the
	/// `partition_location` string to persist on the `blobs` row (`None` in
	/// loose mode).
	pub async fn promote(
		&self,
		staged: StagedBlob,
		cipher: Option<(&BlobCipher, &WrappedDek)>,
	) -> Result<Option<String>> {
		let _guard = self.write_lock.lock().await;

		let final_bytes = if let Some((cipher, wrapped_dek)) = cipher {
			Some(self.encrypt_staged(&staged, cipher, wrapped_dek).await?)
		} else {
			None
		};

		match &self.backend {
			Backend::Loose => {
				if let Some(bytes) = final_bytes {
					let dest_temp = self
						.temp_root
						.join(format!("{}.sealed", uuid::Uuid::new_v4()));
					fs::write(&dest_temp, &bytes).await?;
					loose::promote(&self.storage_root, &staged.hash, &dest_temp).await?;
					self.discard(&staged).await?;
				} else {
					loose::promote(&self.storage_root, &staged.hash, &staged.temp_path).await?;
				}
				Ok(None)
			}
			Backend::Partitioned(writer) => {
				let bytes = match final_bytes {
					Some(b) => b,
					None => fs::read(&staged.temp_path).await?,
				};
				let location = writer.append(&bytes).await?;
				self.discard(&staged).await?;
				Ok(Some(location.encode()))
			}
		}
	}

	async fn encrypt_staged(
		&self,
		staged: &StagedBlob,
		cipher: &BlobCipher,
		wrapped_dek: &WrappedDek,
	) -> Result<Vec<u8>> {
		let envelope = Envelope {
			nonce_base: cipher.nonce_base(),
			wrapped_dek: wrapped_dek.clone(),
		};
		let mut out = envelope.encode();

		let mut file = File::open(&staged.temp_path).await?;
		let mut buf = vec![0u8; CHUNK_SIZE];
		let mut chunk_index: u32 = 0;
		loop {
			let n = file.read(&mut buf).await?;
			if n == 0 {
				break;
			}
			let ciphertext = cipher.encrypt_chunk(chunk_index, &buf[..n])?;
			out.extend_from_slice(&aead::encode_frame(&ciphertext));
			chunk_index += 1;
		}
		Ok(out)
	}

	/// Read a blob's plaintext back out. When `encrypted` is true, the
	/// per-blob DEK and nonce base are recovered from the envelope header
	/// embedded in the ciphertext itself (unwrapped via `mk`) rather than
	/// from any cipher the caller might still have in memory — this is what
	/// lets a blob be read back in a session that didn't ingest it.
	pub async fn get(
		&self,
		hash: &str,
		partition_location: Option<&str>,
		encrypted: bool,
		mk: Option<&MasterKey>,
	) -> Result<Vec<u8>> {
		let raw = match partition_location {
			None => fs::read(loose::path_for(&self.storage_root, hash)).await?,
			Some(loc) => {
				let parsed = PartitionLocation::parse(loc).ok_or_else(|| {
					DlfiError::IntegrityCheckFailed(format!("malformed partition location {loc}"))
				})?;
				partition::read(&self.storage_root, parsed).await?
			}
		};

		let plaintext = if encrypted {
			let mk = mk.ok_or(DlfiError::DecryptionFailed)?;
			self.decrypt_bytes(&raw, mk)?
		} else {
			raw
		};

		let (actual_hash, _) = {
			let mut h = StreamHasher::new();
			h.update(&plaintext);
			h.finalize()
		};
		if actual_hash != hash {
			return Err(DlfiError::IntegrityCheckFailed(hash.to_string()));
		}
		Ok(plaintext)
	}

	fn decrypt_bytes(&self, raw: &[u8], mk: &MasterKey) -> Result<Vec<u8>> {
		let (envelope, mut offset) = Envelope::decode(raw)?;
		let dek = aead::unwrap_dek(mk, &envelope.wrapped_dek)?;
		let cipher = BlobCipher::from_parts(dek, envelope.nonce_base);

		let mut plaintext = Vec::with_capacity(raw.len());
		let mut chunk_index: u32 = 0;
		while offset < raw.len() {
			if offset + FRAME_HEADER_LEN > raw.len() {
				return Err(DlfiError::IntegrityCheckFailed("truncated frame".to_string()));
			}
			let len = u32::from_be_bytes(raw[offset..offset + FRAME_HEADER_LEN].try_into().unwrap())
				as usize;
			offset += FRAME_HEADER_LEN;
			if offset + len > raw.len() {
				return Err(DlfiError::IntegrityCheckFailed("truncated frame body".to_string()));
			}
			let chunk = cipher.decrypt_chunk(chunk_index, &raw[offset..offset + len])?;
			plaintext.extend_from_slice(&chunk);
			offset += len;
			chunk_index += 1;
		}
		Ok(plaintext)
	}

	/// Physically remove a loose-mode blob's bytes. Partition-mode
	/// reclamation happens only via compaction, not per-blob removal.
	pub async fn remove_loose(&self, hash: &str) -> Result<()> {
		loose::remove(&self.storage_root, hash).await
	}

	/// Rewrite just a blob's fixed-length envelope header in place, for key
	/// rotation and toggling encryption on/off: the ciphertext body
	/// that follows it is never touched. `new_header` must be exactly
	/// `aead::ENVELOPE_LEN` bytes, since both loose and partition layouts
	/// treat the header's length as part of the blob's on-disk shape.
	pub async fn rewrite_envelope_header(
		&self,
		hash: &str,
		partition_location: Option<&str>,
		new_header: &[u8],
	) -> Result<()> {
		if new_header.len() != aead::ENVELOPE_LEN {
			return Err(DlfiError::Internal(anyhow::anyhow!(
				"envelope header must be {} bytes, got {}",
				aead::ENVELOPE_LEN,
				new_header.len()
			)));
		}
		let _guard = self.write_lock.lock().await;
		match partition_location {
			None => loose::rewrite_header(&self.storage_root, hash, new_header).await,
			Some(loc) => {
				let parsed = PartitionLocation::parse(loc).ok_or_else(|| {
					DlfiError::IntegrityCheckFailed(format!("malformed partition location {loc}"))
				})?;
				partition::rewrite_header(&self.storage_root, parsed, new_header).await
			}
		}
	}

	/// Read just a blob's envelope header back out, without decrypting the
	/// body — used by key rotation to recover the DEK under the old MK
	/// before rewrapping it under the new one.
	pub async fn read_envelope(&self, hash: &str, partition_location: Option<&str>) -> Result<Envelope> {
		let header = match partition_location {
			None => {
				let path = loose::path_for(&self.storage_root, hash);
				let mut file = File::open(&path).await?;
				let mut buf = vec![0u8; aead::ENVELOPE_LEN];
				file.read_exact(&mut buf).await?;
				buf
			}
			Some(loc) => {
				let parsed = PartitionLocation::parse(loc).ok_or_else(|| {
					DlfiError::IntegrityCheckFailed(format!("malformed partition location {loc}"))
				})?;
				let bytes = partition::read(&self.storage_root, parsed).await?;
				bytes
					.get(..aead::ENVELOPE_LEN)
					.ok_or_else(|| DlfiError::IntegrityCheckFailed(format!("blob {hash} too short for envelope")))?
					.to_vec()
			}
		};
		let (envelope, _) = Envelope::decode(&header)?;
		Ok(envelope)
	}

	/// Sweep `.incomplete` temp files left behind by a crashed ingest.
	/// Returns the number removed.
	pub async fn sweep_incomplete(&self) -> Result<u64> {
		let mut removed = 0;
		let mut entries = fs::read_dir(&self.temp_root).await?;
		while let Some(entry) = entries.next_entry().await? {
			let path = entry.path();
			if path.extension().and_then(|e| e.to_str()) == Some("incomplete") {
				if fs::remove_file(&path).await.is_ok() {
					removed += 1;
				}
			}
		}
		Ok(removed)
	}

	pub fn storage_root(&self) -> &Path {
		&self.storage_root
	}

	/// The partition id currently being appended to, or `None` in loose
	/// mode. Compaction only ever targets sealed partitions below this id —
	/// rewriting the one the writer cursor still points into would desync
	/// its tracked offset from the file's actual length.
	pub async fn current_partition_id(&self) -> Option<u32> {
		match &self.backend {
			Backend::Loose => None,
			Backend::Partitioned(writer) => Some(writer.current_partition_id().await),
		}
	}

	/// Rewrite a sealed partition file down to just its surviving (non-
	/// tombstoned) blobs. Held under the same write lock as `promote`, since
	/// both touch partition files on disk.
	pub async fn compact_partition(
		&self,
		partition_id: u32,
		surviving: &[(String, PartitionLocation)],
	) -> Result<Vec<(String, PartitionLocation)>> {
		let _guard = self.write_lock.lock().await;
		partition::compact(&self.storage_root, partition_id, surviving).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Cursor;

	async fn store(dir: &Path) -> BlobStore {
		BlobStore::open(dir, StorageMode::Loose, (0, 0)).await.unwrap()
	}

	#[tokio::test]
	async fn stage_and_promote_loose_round_trips_plaintext() {
		let dir = tempfile::tempdir().unwrap();
		let store = store(dir.path()).await;
		let data = b"hello world, jojo".to_vec();
		let staged = store.stage(Cursor::new(data.clone())).await.unwrap();
		let hash = staged.hash.clone();
		assert_eq!(staged.size, 17);
		store.promote(staged, None).await.unwrap();
		let got = store.get(&hash, None, false, None).await.unwrap();
		assert_eq!(got, data);
	}

	#[tokio::test]
	async fn empty_reader_hashes_to_well_known_empty_sha256() {
		let dir = tempfile::tempdir().unwrap();
		let store = store(dir.path()).await;
		let staged = store.stage(Cursor::new(Vec::<u8>::new())).await.unwrap();
		assert_eq!(staged.hash, hasher::empty_hash());
		assert_eq!(staged.size, 0);
	}

	#[tokio::test]
	async fn encrypted_round_trip_recovers_plaintext() {
		use crate::crypto::aead::BlobCipher;
		use crate::crypto::kdf::{derive_master_key, Argon2Params};

		let dir = tempfile::tempdir().unwrap();
		let store = store(dir.path()).await;
		let mk = derive_master_key("pw", &[3u8; 16], Argon2Params::default()).unwrap();
		let (cipher, wrapped) = BlobCipher::generate_with_wrap(&mk).unwrap();

		let data = vec![7u8; CHUNK_SIZE * 2 + 13];
		let staged = store.stage(Cursor::new(data.clone())).await.unwrap();
		let hash = staged.hash.clone();
		store.promote(staged, Some((&cipher, &wrapped))).await.unwrap();

		let got = store.get(&hash, None, true, Some(&mk)).await.unwrap();
		assert_eq!(got, data);
	}

	#[tokio::test]
	async fn sweep_incomplete_removes_orphaned_temp_files() {
		let dir = tempfile::tempdir().unwrap();
		let store = store(dir.path()).await;
		let orphan = store.temp_root.join("orphan.incomplete");
		fs::write(&orphan, b"partial").await.unwrap();
		let removed = store.sweep_incomplete().await.unwrap();
		assert_eq!(removed, 1);
		assert!(!orphan.exists());
	}
}
