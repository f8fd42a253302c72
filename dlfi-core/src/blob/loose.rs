//! Loose-mode blob layout: `storage/<h[0:2]>/<h[2:4]>/<h>`.

use crate::error::Result;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};

/// Sharded path for a blob hash under `storage_root`.
pub fn path_for(storage_root: &Path, hash: &str) -> PathBuf {
	let (a, b) = (&hash[0..2], &hash[2..4]);
	storage_root.join(a).join(b).join(hash)
}

/// Ensure the two-level shard directory for `hash` exists.
pub async fn ensure_shard_dir(storage_root: &Path, hash: &str) -> Result<()> {
	let (a, b) = (&hash[0..2], &hash[2..4]);
	fs::create_dir_all(storage_root.join(a).join(b)).await?;
	Ok(())
}

/// Atomically promote a staged temp file into its final loose-mode
/// location: write already landed at `temp_path`, this only renames — the
/// rename is the atomic commit point.
pub async fn promote(storage_root: &Path, hash: &str, temp_path: &Path) -> Result<PathBuf> {
	ensure_shard_dir(storage_root, hash).await?;
	let dest = path_for(storage_root, hash);
	fs::rename(temp_path, &dest).await?;
	Ok(dest)
}

/// Overwrite the leading `header.len()` bytes of a loose blob file in place,
/// for key rotation; the rest of the file is untouched.
pub async fn rewrite_header(storage_root: &Path, hash: &str, header: &[u8]) -> Result<()> {
	let path = path_for(storage_root, hash);
	let mut file = fs::OpenOptions::new().write(true).open(&path).await?;
	file.seek(SeekFrom::Start(0)).await?;
	file.write_all(header).await?;
	file.sync_all().await?;
	Ok(())
}

pub async fn remove(storage_root: &Path, hash: &str) -> Result<()> {
	let path = path_for(storage_root, hash);
	match fs::remove_file(&path).await {
		Ok(()) => Ok(()),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
		Err(e) => Err(e.into()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn shards_on_first_four_hex_chars() {
		let root = PathBuf::from("/archive/storage");
		let p = path_for(&root, "abcdef0123456789");
		assert_eq!(p, root.join("ab").join("cd").join("abcdef0123456789"));
	}
}
