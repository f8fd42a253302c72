//! Identifier & path service.
//!
//! Paths are slash-delimited, normalized to have no leading/trailing slash
//! and no empty/`.`/`..` segments. A path's last segment is its `name`; the
//! remainder is the parent path.

use crate::error::{DlfiError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum length, in bytes, of a single path segment. The exporter writes
/// each segment back out as a filesystem directory entry, so this mirrors a
/// real filesystem's practical limit rather than an arbitrary spec number.
pub const MAX_SEGMENT_LEN: usize = 1024;

/// Typed node identifier so call sites don't pass bare `Uuid`s around.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}

	pub fn nil() -> Self {
		Self(Uuid::nil())
	}
}

impl Default for NodeId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0.as_hyphenated())
	}
}

impl fmt::Debug for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "NodeId({})", self.0.as_hyphenated())
	}
}

impl From<Uuid> for NodeId {
	fn from(u: Uuid) -> Self {
		Self(u)
	}
}

/// Split a normalized path into segments, rejecting anything that would
/// make the path ambiguous or unsafe to project onto a filesystem.
pub fn normalize(path: &str) -> Result<Vec<String>> {
	let trimmed = path.trim_matches('/');
	if trimmed.is_empty() {
		return Ok(Vec::new());
	}
	if trimmed.contains('\0') {
		return Err(DlfiError::InvalidPath(path.to_string()));
	}

	let mut segments = Vec::new();
	for raw in trimmed.split('/') {
		if raw.is_empty() || raw == "." || raw == ".." {
			return Err(DlfiError::InvalidPath(path.to_string()));
		}
		if raw.len() > MAX_SEGMENT_LEN {
			return Err(DlfiError::InvalidPath(path.to_string()));
		}
		segments.push(raw.to_string());
	}
	Ok(segments)
}

/// Re-join normalized segments into a canonical slash-delimited path.
pub fn join(segments: &[String]) -> String {
	segments.join("/")
}

/// `split(path) -> (parent_path, name)`. Fails on the empty (root) path,
/// which has no name.
pub fn split(path: &str) -> Result<(String, String)> {
	let segments = normalize(path)?;
	let name = segments
		.last()
		.cloned()
		.ok_or_else(|| DlfiError::InvalidPath(path.to_string()))?;
	let parent = join(&segments[..segments.len() - 1]);
	Ok((parent, name))
}

/// All proper ancestor paths of `path`, root-first, including `path` itself
/// last. Used by `ensure_vault_chain` to create each missing prefix VAULT
/// in order.
pub fn ancestor_chain(path: &str) -> Result<Vec<String>> {
	let segments = normalize(path)?;
	let mut out = Vec::with_capacity(segments.len());
	for i in 1..=segments.len() {
		out.push(join(&segments[..i]));
	}
	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn normalizes_leading_trailing_slashes() {
		assert_eq!(normalize("/a/b/c/").unwrap(), vec!["a", "b", "c"]);
	}

	#[test]
	fn rejects_dot_segments() {
		assert!(normalize("a/./b").is_err());
		assert!(normalize("a/../b").is_err());
		assert!(normalize("a//b").is_err());
	}

	#[test]
	fn splits_parent_and_name() {
		let (parent, name) = split("m/jojo/ch1").unwrap();
		assert_eq!(parent, "m/jojo");
		assert_eq!(name, "ch1");
	}

	#[test]
	fn split_of_root_segment_has_empty_parent() {
		let (parent, name) = split("m").unwrap();
		assert_eq!(parent, "");
		assert_eq!(name, "m");
	}

	#[test]
	fn ancestor_chain_is_root_first() {
		assert_eq!(
			ancestor_chain("a/b/c").unwrap(),
			vec!["a".to_string(), "a/b".to_string(), "a/b/c".to_string()]
		);
	}

	#[test]
	fn empty_path_is_root_with_no_segments() {
		assert_eq!(normalize("").unwrap(), Vec::<String>::new());
		assert_eq!(normalize("/").unwrap(), Vec::<String>::new());
	}
}
