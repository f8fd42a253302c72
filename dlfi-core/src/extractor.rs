//! Extractor host: drives pluggable source-specific extractors,
//! which each hand back a lazy stream of `DiscoveredNode` values. Every
//! element is routed into the metadata store (A/B) and the blob store (C);
//! a single node's failure is isolated — logged, counted, and the stream
//! advances — rather than aborting the whole run.
//!
//! HTTP/API-facing, site-specific scraping extractors (cookie parsing, DOM
//! walking, rate limiting) are out of scope here: this module only
//! specifies the host-side contract an extractor plugs into.

use crate::blob::BlobStore;
use crate::crypto::{BlobCipher, MasterKey};
use crate::db::MetadataStore;
use crate::error::Result;
use crate::path::NodeId;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;
use tokio::io::AsyncRead;
use tracing::{info, warn};

/// One file attached to a `DiscoveredNode`: a display name plus an input
/// byte stream, ingested through the blob store exactly like any other
/// file binding.
pub struct DiscoveredFile {
	pub display_name: String,
	pub reader: Pin<Box<dyn AsyncRead + Send>>,
}

/// One node an extractor has found, ready to be materialized.
pub struct DiscoveredNode {
	/// Where this node should live in the namespace; ancestor VAULTs are
	/// created as needed.
	pub suggested_path: String,
	pub node_type: crate::db::entities::node::NodeType,
	pub metadata: Value,
	pub files: Vec<DiscoveredFile>,
	pub tags: Vec<String>,
	/// Relationships to install, as `(relation, target_path)`; the target
	/// must already exist or be reachable within the same run (earlier
	/// elements of the stream), otherwise that single relationship install
	/// is itself counted as a per-node failure without aborting the rest.
	pub relationships: Vec<(String, String)>,
}

pub type DiscoveryStream = Pin<Box<dyn Stream<Item = Result<DiscoveredNode>> + Send>>;

/// An extractor plugin: given by the caller as an already-constructed
/// stream (`DiscoveryStream`) — this host has no opinion on how a
/// particular source (filesystem walk, archive format, remote API) builds
/// its stream, only on how elements of it get applied.
#[derive(Default)]
pub struct ExtractionReport {
	pub processed: usize,
	pub failed: Vec<(String, String)>,
}

/// Drive `stream` to completion, applying each `DiscoveredNode` to the
/// metadata + blob stores. Returns a structured summary instead of only log
/// lines, so callers (future HTTP/API collaborators) can report partial
/// failure without parsing logs.
pub async fn run(
	metadata: &MetadataStore,
	blobs: &BlobStore,
	mk: Option<&MasterKey>,
	mut stream: DiscoveryStream,
) -> Result<ExtractionReport> {
	use futures::StreamExt;

	let mut report = ExtractionReport::default();
	while let Some(item) = stream.next().await {
		let node = match item {
			Ok(n) => n,
			Err(e) => {
				warn!("extractor produced a malformed node: {e}");
				report.failed.push(("<unknown>".to_string(), e.to_string()));
				continue;
			}
		};
		let path = node.suggested_path.clone();
		match apply_one(metadata, blobs, mk, node).await {
			Ok(()) => {
				report.processed += 1;
				info!(path = %path, "extractor host applied discovered node");
			}
			Err(e) => {
				warn!(path = %path, error = %e, "extractor host dropped discovered node");
				report.failed.push((path, e.to_string()));
			}
		}
	}
	Ok(report)
}

async fn apply_one(
	metadata: &MetadataStore,
	blobs: &BlobStore,
	mk: Option<&MasterKey>,
	node: DiscoveredNode,
) -> Result<()> {
	let uuid = match metadata.resolve(&node.suggested_path).await {
		Ok(existing) => {
			metadata
				.update_node(
					existing,
					crate::db::UpdateNodePatch {
						metadata: Some(node.metadata),
						..Default::default()
					},
				)
				.await?;
			existing
		}
		Err(_) => match node.node_type {
			crate::db::entities::node::NodeType::Vault => {
				metadata.create_vault(&node.suggested_path).await?
			}
			crate::db::entities::node::NodeType::Record => {
				metadata
					.create_record(&node.suggested_path, node.metadata)
					.await?
			}
		},
	};

	for tag in &node.tags {
		metadata.add_tag(uuid, tag).await?;
	}

	for file in node.files {
		ingest_file(metadata, blobs, mk, uuid, file).await?;
	}

	for (relation, target_path) in node.relationships {
		if let Ok(target) = metadata.resolve(&target_path).await {
			let _ = metadata.link(uuid, target, &relation).await;
		}
	}

	Ok(())
}

async fn ingest_file(
	metadata: &MetadataStore,
	blobs: &BlobStore,
	mk: Option<&MasterKey>,
	record_uuid: NodeId,
	file: DiscoveredFile,
) -> Result<()> {
	// Each file gets its own fresh DEK, generated here
	// rather than threaded in from the caller.
	let wrap = match mk {
		Some(mk) => Some(BlobCipher::generate_with_wrap(mk)?),
		None => None,
	};
	let cipher_ref = wrap.as_ref().map(|(c, w)| (c, w));
	let result = crate::ingest::put(metadata, blobs, cipher_ref, file.reader).await?;
	metadata
		.append_file(record_uuid, &file.display_name, &result.hash, result.new_blob)
		.await
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::blob::StorageMode;
	use crate::db::migration::Migrator;
	use futures::stream;
	use sea_orm::Database;
	use sea_orm_migration::MigratorTrait;
	use serde_json::json;
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
	async fn applies_a_single_discovered_record_with_tags() {
		let (store, blobs, _dir) = setup().await;
		let node = DiscoveredNode {
			suggested_path: "m/jojo/ch1".to_string(),
			node_type: crate::db::entities::node::NodeType::Record,
			metadata: json!({"title": "Chapter 1"}),
			files: vec![],
			tags: vec!["action".to_string()],
			relationships: vec![],
		};
		let items: Vec<Result<DiscoveredNode>> = vec![Ok(node)];
		let discovered: DiscoveryStream = Box::pin(stream::iter(items));

		let report = run(&store, &blobs, None, discovered).await.unwrap();
		assert_eq!(report.processed, 1);
		assert!(report.failed.is_empty());

		let uuid = store.resolve("m/jojo/ch1").await.unwrap();
		let summary = store.get_node(uuid).await.unwrap();
		assert_eq!(summary.tags, vec!["action".to_string()]);
	}

	#[tokio::test]
	async fn isolates_a_single_bad_node_without_aborting_the_run() {
		let (store, blobs, _dir) = setup().await;
		let bad = DiscoveredNode {
			suggested_path: String::new(),
			node_type: crate::db::entities::node::NodeType::Record,
			metadata: json!({}),
			files: vec![],
			tags: vec![],
			relationships: vec![],
		};
		let good = DiscoveredNode {
			suggested_path: "ok".to_string(),
			node_type: crate::db::entities::node::NodeType::Record,
			metadata: json!({}),
			files: vec![],
			tags: vec![],
			relationships: vec![],
		};
		let items: Vec<Result<DiscoveredNode>> = vec![Ok(bad), Ok(good)];
		let discovered: DiscoveryStream = Box::pin(stream::iter(items));

		let report = run(&store, &blobs, None, discovered).await.unwrap();
		assert_eq!(report.processed, 1);
		assert_eq!(report.failed.len(), 1);
		assert!(store.resolve("ok").await.is_ok());
	}

	#[tokio::test]
	async fn ingests_a_discovered_file_into_the_blob_store() {
		let (store, blobs, _dir) = setup().await;
		let data = b"hello world, jojo".to_vec();
		let node = DiscoveredNode {
			suggested_path: "m/jojo/ch1".to_string(),
			node_type: crate::db::entities::node::NodeType::Record,
			metadata: json!({}),
			files: vec![DiscoveredFile {
				display_name: "page1.png".to_string(),
				reader: Box::pin(Cursor::new(data.clone())),
			}],
			tags: vec![],
			relationships: vec![],
		};
		let items: Vec<Result<DiscoveredNode>> = vec![Ok(node)];
		let discovered: DiscoveryStream = Box::pin(stream::iter(items));
		run(&store, &blobs, None, discovered).await.unwrap();

		let uuid = store.resolve("m/jojo/ch1").await.unwrap();
		let files = store.list_files(uuid).await.unwrap();
		assert_eq!(files.len(), 1);
		assert_eq!(files[0].display_name, "page1.png");
	}
}
