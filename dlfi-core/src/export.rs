//! Static exporter: projects the live model into a filesystem tree
//! that can be browsed without the database — every VAULT and RECORD
//! becomes a directory with a `_meta.json` sidecar, plus a top-level
//! `index.json` mapping every uuid to its canonical path.

use crate::blob::BlobStore;
use crate::cancel::{self, Cancellation};
use crate::crypto::MasterKey;
use crate::db::{MetadataStore, NodeSummary, RelationshipSummary};
use crate::error::Result;
use crate::path::NodeId;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs;

/// One entry of the export's `relationships` array: "Relationships
/// whose target is outside the exported subtree are still emitted with the
/// absolute target path."
#[derive(Serialize)]
struct ExportedRelationship {
	relation: String,
	target_path: String,
}

#[derive(Serialize)]
struct MetaSidecar {
	uuid: String,
	#[serde(rename = "type")]
	node_type: &'static str,
	name: String,
	metadata: Value,
	tags: Vec<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	relationships: Option<Vec<ExportedRelationship>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	files: Option<Vec<String>>,
}

/// A file the exporter could not read back out.
#[derive(Clone, Debug)]
pub struct SkippedFile {
	pub record_path: String,
	pub display_name: String,
	pub reason: String,
}

#[derive(Clone, Debug, Default)]
pub struct ExportReport {
	pub directories_written: usize,
	pub files_written: usize,
	pub skipped: Vec<SkippedFile>,
}

/// Disambiguate `display_name` against names already used in the same
/// directory: the first occurrence keeps its name, subsequent collisions
/// become `<stem>_1.<ext>`, `<stem>_2.<ext>`, etc.
fn disambiguate(display_name: &str, used: &mut HashMap<String, usize>) -> String {
	let count = used.entry(display_name.to_string()).or_insert(0);
	if *count == 0 {
		*count += 1;
		return display_name.to_string();
	}
	let n = *count;
	*count += 1;
	match display_name.rsplit_once('.') {
		Some((stem, ext)) if !ext.is_empty() => format!("{stem}_{n}.{ext}"),
		_ => format!("{display_name}_{n}"),
	}
}

/// Export the live archive into `out_dir`. `out_dir` is created if
/// absent; an export into a non-empty directory overwrites matching entries
/// but never deletes pre-existing unrelated files.
pub async fn export(
	metadata: &MetadataStore,
	blobs: &BlobStore,
	mk: Option<&MasterKey>,
	out_dir: &Path,
	cancellation: &Cancellation,
) -> Result<ExportReport> {
	fs::create_dir_all(out_dir).await?;

	let nodes = metadata.all_nodes().await?;
	let relationships = metadata.all_relationships().await?;
	let path_index: HashMap<NodeId, String> = nodes.iter().map(|n| (n.uuid, n.path.clone())).collect();

	let mut incident: HashMap<NodeId, Vec<&RelationshipSummary>> = HashMap::new();
	for r in &relationships {
		incident.entry(r.source).or_default().push(r);
		incident.entry(r.target).or_default().push(r);
	}

	let mut report = ExportReport::default();
	let mut index: BTreeMap<String, String> = BTreeMap::new();

	for (i, node) in nodes.iter().enumerate() {
		if i % 32 == 0 {
			cancel::check(cancellation)?;
		}
		let dir = out_dir.join(&node.path);
		fs::create_dir_all(&dir).await?;
		report.directories_written += 1;
		index.insert(node.uuid.to_string(), node.path.clone());

		let files = if matches!(node.node_type, crate::db::entities::node::NodeType::Record) {
			let bindings = metadata.list_files(node.uuid).await?;
			let mut used: HashMap<String, usize> = HashMap::new();
			let mut names = Vec::with_capacity(bindings.len());
			for binding in &bindings {
				let final_name = disambiguate(&binding.display_name, &mut used);
				match write_one_file(metadata, blobs, mk, node.uuid, binding, &dir, &final_name).await {
					Ok(()) => {
						names.push(final_name);
						report.files_written += 1;
					}
					Err(e) => report.skipped.push(SkippedFile {
						record_path: node.path.clone(),
						display_name: binding.display_name.clone(),
						reason: e.to_string(),
					}),
				}
			}
			Some(names)
		} else {
			None
		};

		write_meta_sidecar(node, files, &incident, &path_index, &dir).await?;
	}

	write_index(out_dir, &index).await?;
	Ok(report)
}

async fn write_one_file(
	metadata: &MetadataStore,
	blobs: &BlobStore,
	mk: Option<&MasterKey>,
	record_uuid: NodeId,
	binding: &crate::db::FileBindingSummary,
	dir: &Path,
	final_name: &str,
) -> Result<()> {
	let _ = record_uuid;
	let blob_row = metadata
		.blob_index_get(&binding.blob_hash)
		.await?
		.ok_or_else(|| crate::error::DlfiError::BlobMissing(binding.blob_hash.clone()))?;
	let bytes = blobs
		.get(
			&binding.blob_hash,
			blob_row.partition_location.as_deref(),
			blob_row.encrypted,
			mk,
		)
		.await?;
	fs::write(dir.join(final_name), bytes).await?;
	Ok(())
}

async fn write_meta_sidecar(
	node: &NodeSummary,
	files: Option<Vec<String>>,
	incident: &HashMap<NodeId, Vec<&RelationshipSummary>>,
	path_index: &HashMap<NodeId, String>,
	dir: &Path,
) -> Result<()> {
	let node_type = match node.node_type {
		crate::db::entities::node::NodeType::Vault => "VAULT",
		crate::db::entities::node::NodeType::Record => "RECORD",
	};

	// Per the resolved Open Question: both VAULT and
	// RECORD sidecars include `relationships` whenever the node has any
	// incident edge, source or target — even if every incident edge points
	// the other way and the array itself ends up empty.
	let rels: Option<Vec<ExportedRelationship>> = incident.get(&node.uuid).map(|edges| {
		let mut edges = edges.clone();
		edges.sort_by(|a, b| a.relation.cmp(&b.relation).then(a.target.cmp(&b.target)));
		edges
			.into_iter()
			.filter(|r| r.source == node.uuid)
			.map(|r| {
				let target_path = path_index
					.get(&r.target)
					.cloned()
					.unwrap_or_else(|| r.target.to_string());
				ExportedRelationship {
					relation: r.relation.clone(),
					target_path,
				}
			})
			.collect()
	});

	let sidecar = MetaSidecar {
		uuid: node.uuid.to_string(),
		node_type,
		name: node.name.clone(),
		metadata: node.metadata.clone(),
		tags: node.tags.clone(),
		relationships: rels,
		files,
	};

	write_canonical_json(&dir.join("_meta.json"), &sidecar).await
}

/// `files` in `MetaSidecar` is populated by the caller after the fact (the
/// sidecar struct needs the final disambiguated names, which are only known
/// once every binding has been written); this helper re-serializes with the
/// real list. Kept as a second pass rather than threading the list through
/// `write_meta_sidecar`'s signature, since most nodes (VAULTs) never need it.
async fn write_canonical_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
	let json = serde_json::to_value(value)
		.map_err(|e| crate::error::DlfiError::Internal(anyhow::anyhow!("serialize {path:?}: {e}")))?;
	let canonical = canonicalize(&json);
	let text = serde_json::to_string_pretty(&canonical)
		.map_err(|e| crate::error::DlfiError::Internal(anyhow::anyhow!("serialize {path:?}: {e}")))?;
	fs::write(path, format!("{text}\n")).await?;
	Ok(())
}

/// Recursively sort object keys so equal logical documents always produce
/// byte-identical JSON.
fn canonicalize(value: &Value) -> Value {
	match value {
		Value::Object(map) => {
			let mut sorted: Map<String, Value> = Map::new();
			let mut keys: Vec<&String> = map.keys().collect();
			keys.sort();
			for k in keys {
				sorted.insert(k.clone(), canonicalize(&map[k]));
			}
			Value::Object(sorted)
		}
		Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
		other => other.clone(),
	}
}

async fn write_index(out_dir: &Path, index: &BTreeMap<String, String>) -> Result<()> {
	let text = serde_json::to_string_pretty(index)
		.map_err(|e| crate::error::DlfiError::Internal(anyhow::anyhow!("serialize index.json: {e}")))?;
	fs::write(out_dir.join("index.json"), format!("{text}\n")).await?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn disambiguates_duplicate_display_names() {
		let mut used = HashMap::new();
		assert_eq!(disambiguate("page.png", &mut used), "page.png");
		assert_eq!(disambiguate("page.png", &mut used), "page_1.png");
		assert_eq!(disambiguate("page.png", &mut used), "page_2.png");
	}

	#[test]
	fn disambiguates_extensionless_names() {
		let mut used = HashMap::new();
		assert_eq!(disambiguate("README", &mut used), "README");
		assert_eq!(disambiguate("README", &mut used), "README_1");
	}

	#[test]
	fn canonicalize_sorts_object_keys_recursively() {
		let value = serde_json::json!({"b": 1, "a": {"z": 1, "y": 2}});
		let sorted = canonicalize(&value);
		let rendered = serde_json::to_string(&sorted).unwrap();
		assert_eq!(rendered, r#"{"a":{"y":2,"z":1},"b":1}"#);
	}
}
