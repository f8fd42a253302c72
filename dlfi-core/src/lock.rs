//! Archive-root file lock: a second process that
//! tries to open an already-open archive refuses with `ArchiveBusy` rather
//! than silently corrupting the metadata store. Grounded in the community
//! artifact-store lock pattern under `other_examples` (`try_lock_exclusive`
//! on a long-lived `File`, never unlinked — unlinking a still-locked file
//! would let a second process create a fresh lock at the same path and
//! defeat mutual exclusion).

use crate::error::{DlfiError, Result};
use fs4::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Held for the lifetime of an open `Archive`; dropping it releases the OS
/// advisory lock.
pub struct ArchiveLock {
	_file: File,
	path: PathBuf,
}

impl ArchiveLock {
	pub fn acquire(archive_dir: &Path) -> Result<Self> {
		let path = archive_dir.join("LOCK");
		let file = OpenOptions::new()
			.create(true)
			.read(true)
			.write(true)
			.open(&path)?;
		if file.try_lock_exclusive().is_err() {
			return Err(DlfiError::ArchiveBusy);
		}
		Ok(Self { _file: file, path })
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn second_acquire_in_same_process_fails() {
		let dir = tempfile::tempdir().unwrap();
		let _first = ArchiveLock::acquire(dir.path()).unwrap();
		let second = ArchiveLock::acquire(dir.path());
		assert!(matches!(second, Err(DlfiError::ArchiveBusy)));
	}

	#[test]
	fn lock_is_released_on_drop() {
		let dir = tempfile::tempdir().unwrap();
		{
			let _lock = ArchiveLock::acquire(dir.path()).unwrap();
		}
		let reacquired = ArchiveLock::acquire(dir.path());
		assert!(reacquired.is_ok());
	}
}
