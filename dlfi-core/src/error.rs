//! Unified error handling for the DL-FI core.

use thiserror::Error;

/// Main error type for every public `dlfi-core` operation.
#[derive(Error, Debug)]
pub enum DlfiError {
	#[error("invalid path: {0}")]
	InvalidPath(String),

	#[error("path already taken: {0}")]
	PathTaken(String),

	#[error("type conflict at {0}: expected a vault")]
	TypeConflict(String),

	#[error("not found: {0}")]
	NotFound(String),

	#[error("relationship already exists: {source} --{relation}--> {target}")]
	RelationExists {
		source: String,
		target: String,
		relation: String,
	},

	#[error("blob missing: {0}")]
	BlobMissing(String),

	#[error("integrity check failed for {0}: hash mismatch on read")]
	IntegrityCheckFailed(String),

	#[error("decryption failed: wrong key or tampered data")]
	DecryptionFailed,

	#[error("archive busy: another process holds the write lock")]
	ArchiveBusy,

	#[error("operation cancelled")]
	Cancelled,

	#[error("query parse error at offset {offset}: {message}")]
	QueryParseError { offset: usize, message: String },

	#[error("internal I/O error: {0}")]
	InternalIO(#[from] std::io::Error),

	#[error("database error: {0}")]
	Database(#[from] sea_orm::DbErr),

	#[error("internal error: {0}")]
	Internal(#[from] anyhow::Error),
}

/// Result alias used throughout `dlfi-core`.
pub type Result<T> = std::result::Result<T, DlfiError>;
