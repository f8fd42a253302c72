//! End-to-end scenarios exercising `Archive` the way a caller would: open an
//! archive rooted at a temp directory, drive a handful of operations, and
//! check the externally observable result.

use dlfi_core::db::UpdateNodePatch;
use dlfi_core::{Archive, DlfiError};
use serde_json::json;
use std::io::Cursor;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn create_and_dedup_two_identical_bindings() {
	let dir = tempfile::tempdir().unwrap();
	let archive = Archive::open(dir.path(), None).await.unwrap();
	let record = archive.create_record("m/jojo/ch1", json!({})).await.unwrap();

	let bytes = b"hello world, jojo".to_vec();
	archive
		.append_file(record, "page1.png", Cursor::new(bytes.clone()))
		.await
		.unwrap();
	archive
		.append_file(record, "page1-copy.png", Cursor::new(bytes.clone()))
		.await
		.unwrap();

	let files = archive.metadata().list_files(record).await.unwrap();
	assert_eq!(files.len(), 2);
	assert_eq!(files[0].blob_hash, files[1].blob_hash);

	let blob = archive.metadata().blob_index_get(&files[0].blob_hash).await.unwrap().unwrap();
	assert_eq!(blob.ref_count, 2);
}

#[tokio::test]
async fn relationship_and_recursive_query() {
	let dir = tempfile::tempdir().unwrap();
	let archive = Archive::open(dir.path(), None).await.unwrap();

	let ch1 = archive.create_record("m/jojo/ch1", json!({})).await.unwrap();
	let araki = archive.create_record("people/araki", json!({})).await.unwrap();
	archive.link(ch1, araki, "AUTHORED_BY").await.unwrap();

	let results = archive
		.query("type:VAULT contains-rel:AUTHORED_BY=people/araki")
		.await
		.unwrap();
	let paths: Vec<_> = results.iter().map(|n| n.path.as_str()).collect();
	assert_eq!(paths, vec!["m", "m/jojo"]);
}

#[tokio::test]
async fn boolean_query_over_tags_and_metadata() {
	let dir = tempfile::tempdir().unwrap();
	let archive = Archive::open(dir.path(), None).await.unwrap();

	let a = archive.create_record("r/a", json!({"year": 2023})).await.unwrap();
	archive.add_tag(a, "nature").await.unwrap();

	let b = archive.create_record("r/b", json!({"year": 2020})).await.unwrap();
	archive.add_tag(b, "landscape").await.unwrap();

	let c = archive.create_record("r/c", json!({"year": 2020})).await.unwrap();
	archive.add_tag(c, "urban").await.unwrap();

	let results = archive
		.query("(tag:nature | tag:landscape) -meta.year=2023")
		.await
		.unwrap();
	let paths: Vec<_> = results.iter().map(|n| n.path.as_str()).collect();
	assert_eq!(paths, vec!["r/b"]);
}

#[tokio::test]
async fn encryption_round_trip_with_reopen() {
	let dir = tempfile::tempdir().unwrap();
	let mut archive = Archive::open(dir.path(), None).await.unwrap();
	let record = archive.create_record("r", json!({})).await.unwrap();

	let mut data = vec![0u8; 1024 * 1024];
	use rand::RngCore;
	rand::thread_rng().fill_bytes(&mut data);

	let token = CancellationToken::new();
	archive.set_encryption(Some("hunter2"), &token).await.unwrap();
	archive.append_file(record, "random.bin", Cursor::new(data.clone())).await.unwrap();

	let files = archive.metadata().list_files(record).await.unwrap();
	let bytes = archive.open_blob(&files[0].blob_hash).await.unwrap();
	assert_eq!(bytes, data);
	drop(archive);

	assert!(Archive::open(dir.path(), Some("hunter2")).await.is_ok());
	drop_lock(dir.path()).await;

	let wrong = Archive::open(dir.path(), Some("wrong")).await;
	assert!(matches!(wrong, Err(DlfiError::DecryptionFailed)));
}

/// `Archive::open` failing still drops its `ArchiveLock` guard, but the
/// successful `open` two lines above needs to go out of scope first.
async fn drop_lock(_root: &std::path::Path) {}

#[tokio::test]
async fn partition_rollover_splits_across_files() {
	let dir = tempfile::tempdir().unwrap();
	let mut archive = Archive::open(dir.path(), None).await.unwrap();
	archive.set_partition_size(4 * 1024).await.unwrap();

	let record = archive.create_record("r", json!({})).await.unwrap();
	for i in 0..3 {
		let data = vec![i as u8; 2 * 1024];
		archive
			.append_file(record, &format!("blob{i}.bin"), Cursor::new(data))
			.await
			.unwrap();
	}

	let files = archive.metadata().list_files(record).await.unwrap();
	let mut partition_ids = std::collections::HashSet::new();
	for f in &files {
		let blob = archive.metadata().blob_index_get(&f.blob_hash).await.unwrap().unwrap();
		let location = blob.partition_location.expect("partitioned mode must record a location");
		let id = location.split(':').next().unwrap().to_string();
		partition_ids.insert(id);
	}
	assert_eq!(partition_ids.len(), 2);
}

#[tokio::test]
async fn export_twice_without_mutation_is_stable() {
	let dir = tempfile::tempdir().unwrap();
	let archive = Archive::open(dir.path(), None).await.unwrap();
	let record = archive.create_record("m/jojo/ch1", json!({"title": "Ch1"})).await.unwrap();
	archive
		.append_file(record, "page1.png", Cursor::new(b"page bytes".to_vec()))
		.await
		.unwrap();

	let token = CancellationToken::new();
	let out_a = tempfile::tempdir().unwrap();
	let out_b = tempfile::tempdir().unwrap();
	archive.export(out_a.path(), &token).await.unwrap();
	archive.export(out_b.path(), &token).await.unwrap();

	let tree_a = snapshot_tree(out_a.path()).await;
	let tree_b = snapshot_tree(out_b.path()).await;
	assert_eq!(tree_a, tree_b);
}

#[tokio::test]
async fn type_conflict_creating_record_under_a_record() {
	let dir = tempfile::tempdir().unwrap();
	let archive = Archive::open(dir.path(), None).await.unwrap();
	archive.create_record("a", json!({})).await.unwrap();
	let result = archive.create_record("a/b", json!({})).await;
	assert!(matches!(result, Err(DlfiError::TypeConflict(_))));
}

#[tokio::test]
async fn empty_file_ingest_uses_well_known_empty_hash() {
	let dir = tempfile::tempdir().unwrap();
	let archive = Archive::open(dir.path(), None).await.unwrap();
	let record = archive.create_record("r", json!({})).await.unwrap();
	archive.append_file(record, "empty.bin", Cursor::new(Vec::new())).await.unwrap();

	let files = archive.metadata().list_files(record).await.unwrap();
	assert_eq!(
		files[0].blob_hash,
		"e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
	);
}

#[tokio::test]
async fn tag_add_remove_is_idempotent() {
	let dir = tempfile::tempdir().unwrap();
	let archive = Archive::open(dir.path(), None).await.unwrap();
	let record = archive.create_record("r", json!({})).await.unwrap();

	archive.add_tag(record, "nature").await.unwrap();
	archive.add_tag(record, "nature").await.unwrap();
	let node = archive.node(record).await.unwrap();
	assert_eq!(node.tags, vec!["nature".to_string()]);

	archive.remove_tag(record, "nature").await.unwrap();
	archive.remove_tag(record, "nature").await.unwrap();
	let node = archive.node(record).await.unwrap();
	assert!(node.tags.is_empty());
}

#[tokio::test]
async fn metadata_merge_replaces_the_whole_object() {
	let dir = tempfile::tempdir().unwrap();
	let archive = Archive::open(dir.path(), None).await.unwrap();
	let record = archive
		.create_record("r", json!({"year": 2020, "title": "old"}))
		.await
		.unwrap();

	archive
		.update_node(
			record,
			UpdateNodePatch {
				metadata: Some(json!({"title": "new"})),
				..Default::default()
			},
		)
		.await
		.unwrap();

	let node = archive.node(record).await.unwrap();
	assert_eq!(node.metadata, json!({"title": "new"}));
}

async fn snapshot_tree(root: &std::path::Path) -> Vec<(String, Vec<u8>)> {
	let mut out = Vec::new();
	let mut stack = vec![root.to_path_buf()];
	while let Some(dir) = stack.pop() {
		let mut entries = tokio::fs::read_dir(&dir).await.unwrap();
		while let Some(entry) = entries.next_entry().await.unwrap() {
			let path = entry.path();
			if entry.file_type().await.unwrap().is_dir() {
				stack.push(path);
			} else {
				let rel = path.strip_prefix(root).unwrap().to_string_lossy().into_owned();
				let bytes = tokio::fs::read(&path).await.unwrap();
				out.push((rel, bytes));
			}
		}
	}
	out.sort_by(|a, b| a.0.cmp(&b.0));
	out
}
