//! Shared file-ingest pipeline: stage, hash, check the
//! blob index, and either discard as a duplicate or promote it into the
//! store. Both the extractor host and `Archive::append_file` funnel
//! through this so the dedup/refcount bookkeeping only lives in one place.
//!
//! The blob index row for a newly promoted blob is deliberately *not*
//! written here: it's inserted by `MetadataStore::append_file` in the same
//! transaction as the binding that references it, so a crash between
//! staging a new blob and binding it can never leave an orphaned
//! zero-ref-count row on disk. Callers thread `PutResult::new_blob` through
//! to `append_file` for exactly that purpose.

use crate::blob::BlobStore;
use crate::crypto::{BlobCipher, WrappedDek};
use crate::db::{MetadataStore, NewBlobInfo};
use crate::error::Result;
use tokio::io::AsyncRead;

/// Outcome of ingesting one byte stream into the blob store.
pub struct PutResult {
	pub hash: String,
	pub size: u64,
	/// `true` if this hash already existed in the blob index and the staged
	/// copy was discarded rather than promoted.
	pub deduped: bool,
	/// `Some` when this blob's index row has not been written yet — the
	/// caller must pass it to `MetadataStore::append_file` so the insert
	/// happens atomically with the binding. `None` when `deduped` is true.
	pub new_blob: Option<NewBlobInfo>,
}

/// Stage `reader`, and either drop it as a duplicate of an already-indexed
/// blob or promote it into the store. The blob index row itself is left for
/// the caller to insert transactionally alongside the binding that will
/// reference it (see module docs).
pub async fn put(
	metadata: &MetadataStore,
	blobs: &BlobStore,
	cipher: Option<(&BlobCipher, &WrappedDek)>,
	reader: impl AsyncRead + Unpin,
) -> Result<PutResult> {
	let staged = blobs.stage(reader).await?;
	let hash = staged.hash.clone();
	let size = staged.size;

	if metadata.blob_index_get(&hash).await?.is_some() {
		blobs.discard(&staged).await?;
		return Ok(PutResult {
			hash,
			size,
			deduped: true,
			new_blob: None,
		});
	}

	let encrypted = cipher.is_some();
	let partition_location = blobs.promote(staged, cipher).await?;

	Ok(PutResult {
		hash,
		size,
		deduped: false,
		new_blob: Some(NewBlobInfo {
			size,
			encrypted,
			partition_location,
		}),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::blob::StorageMode;
	use crate::db::migration::Migrator;
	use sea_orm::Database;
	use sea_orm_migration::MigratorTrait;
	use std::io::Cursor;

	async fn setup() -> (MetadataStore, BlobStore, tempfile::TempDir) {
		let conn = Database::connect("sqlite::memory:").await.unwrap();
		Migrator::up(&conn, None).await.unwrap();
		let store = MetadataStore::new(conn);
		let dir = tempfile::tempdir().unwrap();
		let blobs = BlobStore::open(dir.path(), StorageMode::Loose, (0, 0))
			.await
			.unwrap();
		(store, blobs, dir)
	}

	#[tokio::test]
	async fn second_put_of_same_bytes_is_deduped() {
		let (store, blobs, _dir) = setup().await;
		let data = b"same bytes twice".to_vec();

		let first = put(&store, &blobs, None, Cursor::new(data.clone())).await.unwrap();
		assert!(!first.deduped);

		let second = put(&store, &blobs, None, Cursor::new(data)).await.unwrap();
		assert!(second.deduped);
		assert_eq!(second.hash, first.hash);
	}
}
