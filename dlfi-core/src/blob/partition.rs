//! Partition-mode blob layout: append-only container files of fixed max
//! size `P`, `part_<nnnn>.dat`, with a side-index (`blobs.partition_location`)
//! mapping `hash -> (partition_id, offset, length)`. Partition files are
//! never rewritten in place while open for appends; `compact` rewrites a
//! sealed one wholesale (new file, atomic rename over the original) when
//! `vacuum()` decides it holds reclaimable tombstones.

use crate::db::entities::blob::PartitionLocation;
use crate::error::Result;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::sync::Mutex;

pub fn partition_path(storage_root: &Path, partition_id: u32) -> PathBuf {
	storage_root.join(format!("part_{partition_id:04}.dat"))
}

struct Cursor {
	partition_id: u32,
	offset: u64,
}

/// Tracks the append cursor for the currently open partition; `append`
/// rolls over to a fresh partition file whenever the incoming write would
/// exceed `max_size`.
pub struct PartitionWriter {
	storage_root: PathBuf,
	max_size: u64,
	cursor: Mutex<Cursor>,
}

impl PartitionWriter {
	/// `resume_from` is the highest existing `(partition_id, file_len)`
	/// found on disk at archive-open time, so restarts append rather than
	/// silently overwrite.
	pub fn new(storage_root: PathBuf, max_size: u64, resume_from: (u32, u64)) -> Self {
		Self {
			storage_root,
			max_size,
			cursor: Mutex::new(Cursor {
				partition_id: resume_from.0,
				offset: resume_from.1,
			}),
		}
	}

	pub async fn current_partition_id(&self) -> u32 {
		self.cursor.lock().await.partition_id
	}

	pub async fn append(&self, bytes: &[u8]) -> Result<PartitionLocation> {
		let mut cursor = self.cursor.lock().await;
		let len = bytes.len() as u64;

		if cursor.offset > 0 && cursor.offset + len > self.max_size {
			cursor.partition_id += 1;
			cursor.offset = 0;
		}

		let path = partition_path(&self.storage_root, cursor.partition_id);
		let mut file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(&path)
			.await?;
		file.write_all(bytes).await?;
		file.sync_all().await?;

		let location = PartitionLocation {
			partition_id: cursor.partition_id,
			offset: cursor.offset,
			length: len,
		};
		cursor.offset += len;
		Ok(location)
	}
}

pub async fn read(storage_root: &Path, location: PartitionLocation) -> Result<Vec<u8>> {
	let path = partition_path(storage_root, location.partition_id);
	let mut file = File::open(&path).await?;
	file.seek(SeekFrom::Start(location.offset)).await?;
	let mut buf = vec![0u8; location.length as usize];
	file.read_exact(&mut buf).await?;
	Ok(buf)
}

/// Overwrite the leading `header.len()` bytes of a blob's slot in place, for
/// key rotation. The slot's length never changes, so this never disturbs any
/// other blob packed into the same partition file.
pub async fn rewrite_header(
	storage_root: &Path,
	location: PartitionLocation,
	header: &[u8],
) -> Result<()> {
	let path = partition_path(storage_root, location.partition_id);
	let mut file = OpenOptions::new().write(true).open(&path).await?;
	file.seek(SeekFrom::Start(location.offset)).await?;
	file.write_all(header).await?;
	file.sync_all().await?;
	Ok(())
}

/// Rewrite a sealed partition file keeping only `surviving` slots, in their
/// existing relative order, and drop anything tombstoned. Writes to a
/// sibling temp file first, then renames it over the original — readers
/// either see the old file or the fully-compacted one, never a half-written
/// one. Returns each surviving hash's new location in the rewritten file.
pub async fn compact(
	storage_root: &Path,
	partition_id: u32,
	surviving: &[(String, PartitionLocation)],
) -> Result<Vec<(String, PartitionLocation)>> {
	let mut ordered = surviving.to_vec();
	ordered.sort_by_key(|(_, loc)| loc.offset);

	let final_path = partition_path(storage_root, partition_id);
	let temp_path = storage_root.join(format!("part_{partition_id:04}.dat.compact"));

	let mut new_locations = Vec::with_capacity(ordered.len());
	{
		let mut out = File::create(&temp_path).await?;
		let mut offset = 0u64;
		for (hash, loc) in &ordered {
			let bytes = read(storage_root, *loc).await?;
			out.write_all(&bytes).await?;
			new_locations.push((
				hash.clone(),
				PartitionLocation {
					partition_id,
					offset,
					length: loc.length,
				},
			));
			offset += loc.length;
		}
		out.sync_all().await?;
	}

	tokio::fs::rename(&temp_path, &final_path).await?;
	Ok(new_locations)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn partition_path_is_zero_padded() {
		let root = PathBuf::from("/archive/storage");
		assert_eq!(
			partition_path(&root, 7),
			root.join("part_0007.dat")
		);
	}

	#[tokio::test]
	async fn compact_drops_tombstoned_slots_and_relocates_survivors() {
		let dir = tempfile::tempdir().unwrap();
		let writer = PartitionWriter::new(dir.path().to_path_buf(), 1024, (0, 0));
		let loc_a = writer.append(b"aaaa").await.unwrap();
		let loc_b = writer.append(b"bbbbbb").await.unwrap();
		let loc_c = writer.append(b"cc").await.unwrap();

		// Drop "b", keep "a" and "c".
		let surviving = vec![
			("hash-a".to_string(), loc_a),
			("hash-c".to_string(), loc_c),
		];
		let relocated = compact(dir.path(), 0, &surviving).await.unwrap();
		let map: std::collections::HashMap<_, _> = relocated.into_iter().collect();

		let new_a = map["hash-a"];
		let new_c = map["hash-c"];
		assert_eq!(read(dir.path(), new_a).await.unwrap(), b"aaaa");
		assert_eq!(read(dir.path(), new_c).await.unwrap(), b"cc");

		let file_len = tokio::fs::metadata(partition_path(dir.path(), 0))
			.await
			.unwrap()
			.len();
		assert_eq!(file_len, 6); // "aaaa" + "cc", "bbbbbb" reclaimed
	}
}
