//! Metadata store operations. Every public method here is one atomic
//! transaction: on any error the transaction rolls back and the store is
//! left unchanged.

use super::entities::{blob, file_binding, node, relationship, settings, tag};
use crate::error::{DlfiError, Result};
use crate::path::{self, NodeId};
use chrono::Utc;
use sea_orm::{
	ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection,
	DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// A fully materialized node, with its canonical path and tag list resolved
/// for callers that don't want to walk the tree themselves.
#[derive(Clone, Debug)]
pub struct NodeSummary {
	pub uuid: NodeId,
	pub node_type: node::NodeType,
	pub parent_uuid: Option<NodeId>,
	pub name: String,
	pub path: String,
	pub metadata: Value,
	pub tags: Vec<String>,
	pub created_at: chrono::DateTime<Utc>,
	pub updated_at: chrono::DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct FileBindingSummary {
	pub position: i32,
	pub display_name: String,
	pub blob_hash: String,
}

#[derive(Clone, Debug)]
pub struct RelationshipSummary {
	pub source: NodeId,
	pub target: NodeId,
	pub relation: String,
}

/// Patch applied by `update_node`. `None` fields are left untouched; `Some`
/// fields replace the whole corresponding piece of state.
#[derive(Clone, Debug, Default)]
pub struct UpdateNodePatch {
	pub metadata: Option<Value>,
	pub tags: Option<Vec<String>>,
	pub name: Option<String>,
}

/// Columns needed to insert a fresh `blobs` row, passed into `append_file`
/// when the ingested hash wasn't already indexed.
#[derive(Clone, Debug)]
pub struct NewBlobInfo {
	pub size: u64,
	pub encrypted: bool,
	pub partition_location: Option<String>,
}

pub struct MetadataStore {
	conn: DatabaseConnection,
	/// Single-writer discipline: held for the duration of each public
	/// mutating call. Readers (queries) don't take it.
	writer: Mutex<()>,
}

impl MetadataStore {
	pub fn new(conn: DatabaseConnection) -> Self {
		Self {
			conn,
			writer: Mutex::new(()),
		}
	}

	pub fn connection(&self) -> &DatabaseConnection {
		&self.conn
	}

	// ---- path resolution -------------------------------------------------

	/// `resolve(path) -> uuid | NotFound`.
	pub async fn resolve(&self, path: &str) -> Result<NodeId> {
		let segments = path::normalize(path)?;
		let mut current: Option<node::Model> = None;
		for segment in &segments {
			let parent_uuid = current.as_ref().map(|n| n.uuid);
			let found = node::Entity::find()
				.filter(node::Column::ParentUuid.eq(parent_uuid))
				.filter(node::Column::Name.eq(segment.as_str()))
				.one(&self.conn)
				.await?;
			current = Some(found.ok_or_else(|| DlfiError::NotFound(path.to_string()))?);
		}
		current
			.map(|n| NodeId(n.uuid))
			.ok_or_else(|| DlfiError::NotFound(path.to_string()))
	}

	/// Build a `uuid -> canonical path` index for every node in one pass,
	/// used by the query engine and the static exporter so path computation
	/// doesn't re-walk ancestors per node.
	pub async fn build_path_index(&self) -> Result<HashMap<NodeId, String>> {
		let all = node::Entity::find().all(&self.conn).await?;
		let by_uuid: HashMap<uuid::Uuid, &node::Model> =
			all.iter().map(|n| (n.uuid, n)).collect();
		let mut cache: HashMap<uuid::Uuid, String> = HashMap::new();

		fn resolve_path(
			id: uuid::Uuid,
			by_uuid: &HashMap<uuid::Uuid, &node::Model>,
			cache: &mut HashMap<uuid::Uuid, String>,
		) -> String {
			if let Some(p) = cache.get(&id) {
				return p.clone();
			}
			let node = by_uuid[&id];
			let path = match node.parent_uuid {
				None => node.name.clone(),
				Some(parent) => {
					let parent_path = resolve_path(parent, by_uuid, cache);
					format!("{parent_path}/{}", node.name)
				}
			};
			cache.insert(id, path.clone());
			path
		}

		let mut index = HashMap::with_capacity(all.len());
		for n in &all {
			let p = resolve_path(n.uuid, &by_uuid, &mut cache);
			index.insert(NodeId(n.uuid), p);
		}
		Ok(index)
	}

	pub async fn canonical_path(&self, uuid: NodeId) -> Result<String> {
		let index = self.build_path_index().await?;
		index
			.get(&uuid)
			.cloned()
			.ok_or_else(|| DlfiError::NotFound(uuid.to_string()))
	}

	// ---- node reads --------------------------------------------------

	async fn load_tags(conn: &impl ConnectionTrait, uuid: uuid::Uuid) -> Result<Vec<String>> {
		let rows = tag::Entity::find()
			.filter(tag::Column::NodeUuid.eq(uuid))
			.order_by_asc(tag::Column::Position)
			.all(conn)
			.await?;
		Ok(rows.into_iter().map(|r| r.tag).collect())
	}

	fn to_summary(n: node::Model, path: String, tags: Vec<String>) -> Result<NodeSummary> {
		let metadata: Value = serde_json::from_str(&n.metadata_json).unwrap_or(Value::Null);
		Ok(NodeSummary {
			uuid: NodeId(n.uuid),
			node_type: n.node_type(),
			parent_uuid: n.parent_uuid.map(NodeId),
			name: n.name,
			path,
			metadata,
			tags,
			created_at: n.created_at.into(),
			updated_at: n.updated_at.into(),
		})
	}

	pub async fn get_node(&self, uuid: NodeId) -> Result<NodeSummary> {
		let n = node::Entity::find_by_id(uuid.0)
			.one(&self.conn)
			.await?
			.ok_or_else(|| DlfiError::NotFound(uuid.to_string()))?;
		let path = self.canonical_path(uuid).await?;
		let tags = Self::load_tags(&self.conn, uuid.0).await?;
		Self::to_summary(n, path, tags)
	}

	pub async fn all_nodes(&self) -> Result<Vec<NodeSummary>> {
		let index = self.build_path_index().await?;
		let all = node::Entity::find().all(&self.conn).await?;
		let mut out = Vec::with_capacity(all.len());
		for n in all {
			let id = NodeId(n.uuid);
			let path = index.get(&id).cloned().unwrap_or_default();
			let tags = Self::load_tags(&self.conn, n.uuid).await?;
			out.push(Self::to_summary(n, path, tags)?);
		}
		Ok(out)
	}

	/// All strict descendants of `uuid` (not including itself), via
	/// iterative BFS over `parent_uuid`.
	pub async fn descendants_of(&self, uuid: NodeId) -> Result<Vec<NodeId>> {
		let mut frontier = vec![uuid.0];
		let mut out = Vec::new();
		loop {
			let children = node::Entity::find()
				.filter(node::Column::ParentUuid.is_in(frontier.clone()))
				.all(&self.conn)
				.await?;
			if children.is_empty() {
				break;
			}
			frontier = children.iter().map(|c| c.uuid).collect();
			out.extend(frontier.iter().map(|u| NodeId(*u)));
		}
		Ok(out)
	}

	pub async fn list_children(&self, parent: Option<NodeId>) -> Result<Vec<NodeSummary>> {
		let parent_uuid = parent.map(|p| p.0);
		let children = node::Entity::find()
			.filter(node::Column::ParentUuid.eq(parent_uuid))
			.all(&self.conn)
			.await?;
		let index = self.build_path_index().await?;
		let mut out = Vec::with_capacity(children.len());
		for n in children {
			let id = NodeId(n.uuid);
			let path = index.get(&id).cloned().unwrap_or_default();
			let tags = Self::load_tags(&self.conn, n.uuid).await?;
			out.push(Self::to_summary(n, path, tags)?);
		}
		Ok(out)
	}

	// ---- node creation -------------------------------------------------

	/// `ensure_vault_chain(path)`: create each missing ancestor VAULT,
	/// or validate that an existing node at that prefix is a VAULT.
	/// Returns the uuid of the deepest existing/created ancestor (the
	/// immediate parent of `path`'s final segment), or `None` for the root.
	async fn ensure_vault_chain_txn(
		txn: &DatabaseTransaction,
		segments: &[String],
	) -> Result<Option<uuid::Uuid>> {
		let mut parent: Option<uuid::Uuid> = None;
		for segment in segments {
			let existing = node::Entity::find()
				.filter(node::Column::ParentUuid.eq(parent))
				.filter(node::Column::Name.eq(segment.as_str()))
				.one(txn)
				.await?;
			match existing {
				Some(n) if n.is_vault() => parent = Some(n.uuid),
				Some(_) => return Err(DlfiError::TypeConflict(segment.clone())),
				None => {
					let now = Utc::now();
					let uuid = uuid::Uuid::new_v4();
					let am = node::ActiveModel {
						uuid: Set(uuid),
						node_type: Set(node::NodeType::Vault.into()),
						parent_uuid: Set(parent),
						name: Set(segment.clone()),
						metadata_json: Set("{}".to_string()),
						created_at: Set(now.into()),
						updated_at: Set(now.into()),
					};
					am.insert(txn).await?;
					parent = Some(uuid);
				}
			}
		}
		Ok(parent)
	}

	async fn create_node(
		&self,
		path: &str,
		node_type: node::NodeType,
		metadata: Value,
	) -> Result<NodeId> {
		if !metadata.is_null() && !metadata.is_object() {
			return Err(DlfiError::InvalidPath(format!(
				"metadata for {path} must be a JSON object"
			)));
		}
		let _guard = self.writer.lock().await;
		let segments = path::normalize(path)?;
		if segments.is_empty() {
			return Err(DlfiError::InvalidPath(path.to_string()));
		}
		let (ancestors, name) = segments.split_at(segments.len() - 1);

		let txn = self.conn.begin().await?;
		let parent = Self::ensure_vault_chain_txn(&txn, ancestors).await?;

		let existing = node::Entity::find()
			.filter(node::Column::ParentUuid.eq(parent))
			.filter(node::Column::Name.eq(&name[0]))
			.one(&txn)
			.await?;
		if existing.is_some() {
			return Err(DlfiError::PathTaken(path.to_string()));
		}

		let now = Utc::now();
		let uuid = uuid::Uuid::new_v4();
		let metadata_json = if metadata.is_null() {
			"{}".to_string()
		} else {
			metadata.to_string()
		};
		let am = node::ActiveModel {
			uuid: Set(uuid),
			node_type: Set(node_type.into()),
			parent_uuid: Set(parent),
			name: Set(name[0].clone()),
			metadata_json: Set(metadata_json),
			created_at: Set(now.into()),
			updated_at: Set(now.into()),
		};
		am.insert(&txn).await?;
		txn.commit().await?;
		Ok(NodeId(uuid))
	}

	pub async fn create_vault(&self, path: &str) -> Result<NodeId> {
		self.create_node(path, node::NodeType::Vault, Value::Null)
			.await
	}

	pub async fn create_record(&self, path: &str, metadata: Value) -> Result<NodeId> {
		self.create_node(path, node::NodeType::Record, metadata)
			.await
	}

	// ---- node mutation -------------------------------------------------

	pub async fn update_node(&self, uuid: NodeId, patch: UpdateNodePatch) -> Result<()> {
		let _guard = self.writer.lock().await;
		let txn = self.conn.begin().await?;
		let n = node::Entity::find_by_id(uuid.0)
			.one(&txn)
			.await?
			.ok_or_else(|| DlfiError::NotFound(uuid.to_string()))?;

		let mut am: node::ActiveModel = n.clone().into();
		let mut changed = false;

		if let Some(name) = &patch.name {
			let sibling = node::Entity::find()
				.filter(node::Column::ParentUuid.eq(n.parent_uuid))
				.filter(node::Column::Name.eq(name.as_str()))
				.one(&txn)
				.await?;
			if sibling.is_some_and(|s| s.uuid != n.uuid) {
				return Err(DlfiError::PathTaken(name.clone()));
			}
			am.name = Set(name.clone());
			changed = true;
		}

		if let Some(metadata) = &patch.metadata {
			if !metadata.is_object() {
				return Err(DlfiError::InvalidPath(
					"metadata must be a JSON object".to_string(),
				));
			}
			am.metadata_json = Set(metadata.to_string());
			changed = true;
		}

		if changed {
			am.updated_at = Set(Utc::now().into());
			am.update(&txn).await?;
		}

		if let Some(tags) = &patch.tags {
			Self::replace_tags_txn(&txn, n.uuid, tags).await?;
		}

		txn.commit().await?;
		Ok(())
	}

	/// Shallow top-level JSON merge: `patch` keys overwrite, `null` values
	/// delete the key. Distinct from `update_node`'s whole-object replace.
	pub async fn merge_metadata(&self, uuid: NodeId, patch: Value) -> Result<()> {
		let patch_obj = patch
			.as_object()
			.ok_or_else(|| DlfiError::InvalidPath("metadata patch must be a JSON object".into()))?
			.clone();

		let _guard = self.writer.lock().await;
		let txn = self.conn.begin().await?;
		let n = node::Entity::find_by_id(uuid.0)
			.one(&txn)
			.await?
			.ok_or_else(|| DlfiError::NotFound(uuid.to_string()))?;

		let mut current: Value = serde_json::from_str(&n.metadata_json).unwrap_or(Value::Null);
		if !current.is_object() {
			current = Value::Object(Default::default());
		}
		let obj = current.as_object_mut().unwrap();
		for (k, v) in patch_obj {
			if v.is_null() {
				obj.remove(&k);
			} else {
				obj.insert(k, v);
			}
		}

		let mut am: node::ActiveModel = n.into();
		am.metadata_json = Set(current.to_string());
		am.updated_at = Set(Utc::now().into());
		am.update(&txn).await?;
		txn.commit().await?;
		Ok(())
	}

	fn normalize_tags(tags: &[String]) -> Vec<String> {
		let mut seen = std::collections::HashSet::new();
		let mut out = Vec::new();
		for t in tags {
			let lower = t.to_lowercase();
			if seen.insert(lower.clone()) {
				out.push(lower);
			}
		}
		out
	}

	async fn replace_tags_txn(
		txn: &DatabaseTransaction,
		node_uuid: uuid::Uuid,
		tags: &[String],
	) -> Result<()> {
		tag::Entity::delete_many()
			.filter(tag::Column::NodeUuid.eq(node_uuid))
			.exec(txn)
			.await?;
		for (i, t) in Self::normalize_tags(tags).into_iter().enumerate() {
			let am = tag::ActiveModel {
				id: sea_orm::NotSet,
				node_uuid: Set(node_uuid),
				tag: Set(t),
				position: Set(i as i32),
			};
			am.insert(txn).await?;
		}
		Ok(())
	}

	/// Idempotent under repeat application: adding a tag already present is
	/// a no-op.
	pub async fn add_tag(&self, uuid: NodeId, value: &str) -> Result<()> {
		let lower = value.to_lowercase();
		let _guard = self.writer.lock().await;
		let txn = self.conn.begin().await?;
		if node::Entity::find_by_id(uuid.0).one(&txn).await?.is_none() {
			return Err(DlfiError::NotFound(uuid.to_string()));
		}
		let existing = tag::Entity::find()
			.filter(tag::Column::NodeUuid.eq(uuid.0))
			.filter(tag::Column::Tag.eq(lower.as_str()))
			.one(&txn)
			.await?;
		if existing.is_none() {
			let next_pos = tag::Entity::find()
				.filter(tag::Column::NodeUuid.eq(uuid.0))
				.all(&txn)
				.await?
				.len() as i32;
			let am = tag::ActiveModel {
				id: sea_orm::NotSet,
				node_uuid: Set(uuid.0),
				tag: Set(lower),
				position: Set(next_pos),
			};
			am.insert(&txn).await?;
		}
		txn.commit().await?;
		Ok(())
	}

	/// Idempotent under repeat application: removing an absent tag is a
	/// no-op.
	pub async fn remove_tag(&self, uuid: NodeId, value: &str) -> Result<()> {
		let lower = value.to_lowercase();
		let _guard = self.writer.lock().await;
		let txn = self.conn.begin().await?;
		tag::Entity::delete_many()
			.filter(tag::Column::NodeUuid.eq(uuid.0))
			.filter(tag::Column::Tag.eq(lower.as_str()))
			.exec(&txn)
			.await?;
		txn.commit().await?;
		Ok(())
	}

	// ---- file bindings -------------------------------------------------

	pub async fn list_files(&self, record_uuid: NodeId) -> Result<Vec<FileBindingSummary>> {
		let rows = file_binding::Entity::find()
			.filter(file_binding::Column::RecordUuid.eq(record_uuid.0))
			.order_by_asc(file_binding::Column::Position)
			.all(&self.conn)
			.await?;
		Ok(rows
			.into_iter()
			.map(|r| FileBindingSummary {
				position: r.position,
				display_name: r.display_name,
				blob_hash: r.blob_hash,
			})
			.collect())
	}

	/// Appends at `position = current count`. If `new_blob` is `Some`, the
	/// blob index row is inserted (ref_count starting at 0) in the same
	/// transaction as the binding, rather than requiring the caller to have
	/// already committed it separately — a crash between those two writes
	/// would otherwise leave a zero-ref blob row with no binding pointing at
	/// it. If `new_blob` is `None`, the blob must already be indexed (the
	/// dedup path, where `BlobStore::stage`/`discard` found an existing
	/// hash). Either way, the row's ref_count is incremented as part of this
	/// same transaction.
	pub async fn append_file(
		&self,
		record_uuid: NodeId,
		display_name: &str,
		blob_hash: &str,
		new_blob: Option<NewBlobInfo>,
	) -> Result<()> {
		let _guard = self.writer.lock().await;
		let txn = self.conn.begin().await?;

		let record = node::Entity::find_by_id(record_uuid.0)
			.one(&txn)
			.await?
			.ok_or_else(|| DlfiError::NotFound(record_uuid.to_string()))?;
		if record.is_vault() {
			return Err(DlfiError::TypeConflict(record_uuid.to_string()));
		}

		let blob_row = match blob::Entity::find_by_id(blob_hash.to_string())
			.one(&txn)
			.await?
		{
			Some(row) => row,
			None => {
				let info = new_blob.ok_or_else(|| DlfiError::BlobMissing(blob_hash.to_string()))?;
				let am = blob::ActiveModel {
					hash: Set(blob_hash.to_string()),
					size: Set(info.size as i64),
					ref_count: Set(0),
					pin_count: Set(0),
					encrypted: Set(info.encrypted),
					partition_location: Set(info.partition_location),
					tombstoned: Set(false),
				};
				am.insert(&txn).await?
			}
		};

		let position = file_binding::Entity::find()
			.filter(file_binding::Column::RecordUuid.eq(record_uuid.0))
			.all(&txn)
			.await?
			.len() as i32;

		let am = file_binding::ActiveModel {
			id: sea_orm::NotSet,
			record_uuid: Set(record_uuid.0),
			position: Set(position),
			display_name: Set(display_name.to_string()),
			blob_hash: Set(blob_hash.to_string()),
		};
		am.insert(&txn).await?;

		let new_ref_count = blob_row.ref_count + 1;
		let mut blob_am: blob::ActiveModel = blob_row.into();
		blob_am.ref_count = Set(new_ref_count);
		blob_am.tombstoned = Set(false);
		blob_am.update(&txn).await?;

		txn.commit().await?;
		Ok(())
	}

	/// Removes a single binding by position; decrements the blob's
	/// ref_count and tombstones it if it reaches zero.
	pub async fn remove_file(&self, record_uuid: NodeId, position: i32) -> Result<()> {
		let _guard = self.writer.lock().await;
		let txn = self.conn.begin().await?;
		let binding = file_binding::Entity::find()
			.filter(file_binding::Column::RecordUuid.eq(record_uuid.0))
			.filter(file_binding::Column::Position.eq(position))
			.one(&txn)
			.await?
			.ok_or_else(|| DlfiError::NotFound(format!("{record_uuid}#{position}")))?;
		let hash = binding.blob_hash.clone();
		file_binding::Entity::delete_by_id(binding.id).exec(&txn).await?;
		Self::decrement_blob_ref_txn(&txn, &hash).await?;
		txn.commit().await?;
		Ok(())
	}

	async fn decrement_blob_ref_txn(txn: &DatabaseTransaction, hash: &str) -> Result<()> {
		if let Some(row) = blob::Entity::find_by_id(hash.to_string()).one(txn).await? {
			let new_count = (row.ref_count - 1).max(0);
			let mut am: blob::ActiveModel = row.into();
			am.ref_count = Set(new_count);
			if new_count == 0 {
				am.tombstoned = Set(true);
			}
			am.update(txn).await?;
		}
		Ok(())
	}

	// ---- relationships -------------------------------------------------

	pub async fn link(&self, source: NodeId, target: NodeId, relation: &str) -> Result<()> {
		if source == target {
			return Err(DlfiError::InvalidPath(
				"relationship cannot be a self-loop".into(),
			));
		}
		if !relation_label_valid(relation) {
			return Err(DlfiError::InvalidPath(format!(
				"invalid relation label: {relation}"
			)));
		}
		let _guard = self.writer.lock().await;
		let txn = self.conn.begin().await?;
		for id in [source, target] {
			if node::Entity::find_by_id(id.0).one(&txn).await?.is_none() {
				return Err(DlfiError::NotFound(id.to_string()));
			}
		}
		let existing = relationship::Entity::find()
			.filter(relationship::Column::SourceUuid.eq(source.0))
			.filter(relationship::Column::TargetUuid.eq(target.0))
			.filter(relationship::Column::Relation.eq(relation))
			.one(&txn)
			.await?;
		if existing.is_some() {
			return Err(DlfiError::RelationExists {
				source: source.to_string(),
				target: target.to_string(),
				relation: relation.to_string(),
			});
		}
		let am = relationship::ActiveModel {
			id: sea_orm::NotSet,
			source_uuid: Set(source.0),
			target_uuid: Set(target.0),
			relation: Set(relation.to_string()),
		};
		am.insert(&txn).await?;
		txn.commit().await?;
		Ok(())
	}

	pub async fn unlink(
		&self,
		source: NodeId,
		target: NodeId,
		relation: &str,
		idempotent: bool,
	) -> Result<()> {
		let _guard = self.writer.lock().await;
		let txn = self.conn.begin().await?;
		let existing = relationship::Entity::find()
			.filter(relationship::Column::SourceUuid.eq(source.0))
			.filter(relationship::Column::TargetUuid.eq(target.0))
			.filter(relationship::Column::Relation.eq(relation))
			.one(&txn)
			.await?;
		match existing {
			Some(row) => {
				relationship::Entity::delete_by_id(row.id).exec(&txn).await?;
			}
			None if idempotent => {}
			None => {
				return Err(DlfiError::NotFound(format!(
					"{source} --{relation}--> {target}"
				)))
			}
		}
		txn.commit().await?;
		Ok(())
	}

	/// All relationships with `uuid` as either endpoint.
	pub async fn incident_relationships(&self, uuid: NodeId) -> Result<Vec<RelationshipSummary>> {
		let rows = relationship::Entity::find()
			.filter(
				Condition::any()
					.add(relationship::Column::SourceUuid.eq(uuid.0))
					.add(relationship::Column::TargetUuid.eq(uuid.0)),
			)
			.all(&self.conn)
			.await?;
		Ok(rows
			.into_iter()
			.map(|r| RelationshipSummary {
				source: NodeId(r.source_uuid),
				target: NodeId(r.target_uuid),
				relation: r.relation,
			})
			.collect())
	}

	/// Every relationship in the archive, for the query planner and the
	/// static exporter — both need the full edge set rather than one node's
	/// incident subset.
	pub async fn all_relationships(&self) -> Result<Vec<RelationshipSummary>> {
		let rows = relationship::Entity::find().all(&self.conn).await?;
		Ok(rows
			.into_iter()
			.map(|r| RelationshipSummary {
				source: NodeId(r.source_uuid),
				target: NodeId(r.target_uuid),
				relation: r.relation,
			})
			.collect())
	}

	pub async fn outgoing_relationships(&self, uuid: NodeId) -> Result<Vec<RelationshipSummary>> {
		let rows = relationship::Entity::find()
			.filter(relationship::Column::SourceUuid.eq(uuid.0))
			.all(&self.conn)
			.await?;
		Ok(rows
			.into_iter()
			.map(|r| RelationshipSummary {
				source: NodeId(r.source_uuid),
				target: NodeId(r.target_uuid),
				relation: r.relation,
			})
			.collect())
	}

	// ---- deletion -------------------------------------------------

	/// Recursive delete: gathers the descendant set, decrements the
	/// ref-count of every blob referenced by a descendant RECORD's file
	/// bindings, then deletes the node itself. Tags, file bindings, and
	/// incident relationships all cascade at the schema level (`ON DELETE
	/// CASCADE`), which is what makes deleting an internal VAULT with many
	/// descendants a single statement instead of a hand-rolled tree walk.
	pub async fn delete(&self, uuid: NodeId) -> Result<Vec<NodeId>> {
		let _guard = self.writer.lock().await;
		let txn = self.conn.begin().await?;

		if node::Entity::find_by_id(uuid.0).one(&txn).await?.is_none() {
			return Err(DlfiError::NotFound(uuid.to_string()));
		}

		let mut set = vec![uuid];
		{
			let mut frontier = vec![uuid.0];
			loop {
				let children = node::Entity::find()
					.filter(node::Column::ParentUuid.is_in(frontier.clone()))
					.all(&txn)
					.await?;
				if children.is_empty() {
					break;
				}
				frontier = children.iter().map(|c| c.uuid).collect();
				set.extend(frontier.iter().map(|u| NodeId(*u)));
			}
		}

		for &id in &set {
			let bindings = file_binding::Entity::find()
				.filter(file_binding::Column::RecordUuid.eq(id.0))
				.all(&txn)
				.await?;
			for b in bindings {
				Self::decrement_blob_ref_txn(&txn, &b.blob_hash).await?;
			}
		}

		node::Entity::delete_by_id(uuid.0).exec(&txn).await?;
		txn.commit().await?;
		Ok(set)
	}

	/// Each uuid's deletion is its own atomic transaction (all-or-nothing
	/// per item); one item's failure doesn't abort the rest of the batch.
	/// Chunked on `cancellation`: once tripped, every remaining item is
	/// reported as `Cancelled` without being touched, so the caller gets a
	/// result slot per input uuid either way.
	pub async fn bulk_delete(
		&self,
		uuids: &[NodeId],
		cancellation: &crate::cancel::Cancellation,
	) -> Vec<Result<Vec<NodeId>>> {
		let mut out = Vec::with_capacity(uuids.len());
		for &id in uuids {
			if crate::cancel::check(cancellation).is_err() {
				out.push(Err(DlfiError::Cancelled));
				continue;
			}
			out.push(self.delete(id).await);
		}
		out
	}

	// ---- blob index (the `blobs` table lives in db.sqlite; bytes live in
	// the blob store filesystem, see `crate::blob`) -------------------

	pub async fn blob_index_get(&self, hash: &str) -> Result<Option<blob::Model>> {
		Ok(blob::Entity::find_by_id(hash.to_string())
			.one(&self.conn)
			.await?)
	}

	pub async fn blob_pin(&self, hash: &str) -> Result<()> {
		let _guard = self.writer.lock().await;
		let txn = self.conn.begin().await?;
		let row = blob::Entity::find_by_id(hash.to_string())
			.one(&txn)
			.await?
			.ok_or_else(|| DlfiError::BlobMissing(hash.to_string()))?;
		let new_pin_count = row.pin_count + 1;
		let new_ref_count = row.ref_count + 1;
		let mut am: blob::ActiveModel = row.into();
		am.pin_count = Set(new_pin_count);
		am.ref_count = Set(new_ref_count);
		am.tombstoned = Set(false);
		am.update(&txn).await?;
		txn.commit().await?;
		Ok(())
	}

	pub async fn blob_unpin(&self, hash: &str) -> Result<()> {
		let _guard = self.writer.lock().await;
		let txn = self.conn.begin().await?;
		let row = blob::Entity::find_by_id(hash.to_string())
			.one(&txn)
			.await?
			.ok_or_else(|| DlfiError::BlobMissing(hash.to_string()))?;
		let pins = row.pin_count;
		let refs = row.ref_count;
		let mut am: blob::ActiveModel = row.into();
		let new_pins = (pins - 1).max(0);
		let new_refs = (refs - 1).max(0);
		am.pin_count = Set(new_pins);
		am.ref_count = Set(new_refs);
		if new_refs == 0 {
			am.tombstoned = Set(true);
		}
		am.update(&txn).await?;
		txn.commit().await?;
		Ok(())
	}

	/// Blobs flagged for deletion (ref_count reached zero); `vacuum()`
	/// reads this list to know which loose files / partition slots to
	/// reclaim.
	pub async fn tombstoned_blobs(&self) -> Result<Vec<blob::Model>> {
		Ok(blob::Entity::find()
			.filter(blob::Column::Tombstoned.eq(true))
			.all(&self.conn)
			.await?)
	}

	pub async fn blob_index_remove(&self, hash: &str) -> Result<()> {
		blob::Entity::delete_by_id(hash.to_string())
			.exec(&self.conn)
			.await?;
		Ok(())
	}

	/// Every indexed blob, for bulk crypto operations (enable/disable
	/// encryption, key rotation) that must touch every row, not just
	/// the tombstoned subset `vacuum()` cares about.
	pub async fn all_blobs(&self) -> Result<Vec<blob::Model>> {
		Ok(blob::Entity::find().all(&self.conn).await?)
	}

	/// Update a blob's `encrypted`/`partition_location` columns after its
	/// bytes have been rewritten in a new encryption state. Ref-count and tombstone state are untouched.
	pub async fn blob_update_location(
		&self,
		hash: &str,
		encrypted: bool,
		partition_location: Option<String>,
	) -> Result<()> {
		let _guard = self.writer.lock().await;
		let row = blob::Entity::find_by_id(hash.to_string())
			.one(&self.conn)
			.await?
			.ok_or_else(|| DlfiError::BlobMissing(hash.to_string()))?;
		let mut am: blob::ActiveModel = row.into();
		am.encrypted = Set(encrypted);
		am.partition_location = Set(partition_location);
		am.update(&self.conn).await?;
		Ok(())
	}

	// ---- settings -------------------------------------------------

	pub async fn load_settings_json(&self) -> Result<Option<String>> {
		Ok(settings::Entity::find_by_id(0)
			.one(&self.conn)
			.await?
			.map(|s| s.settings_json))
	}

	pub async fn save_settings_json(&self, json: &str) -> Result<()> {
		let _guard = self.writer.lock().await;
		let existing = settings::Entity::find_by_id(0).one(&self.conn).await?;
		match existing {
			Some(row) => {
				let mut am: settings::ActiveModel = row.into();
				am.settings_json = Set(json.to_string());
				am.update(&self.conn).await?;
			}
			None => {
				let am = settings::ActiveModel {
					id: Set(0),
					settings_json: Set(json.to_string()),
				};
				am.insert(&self.conn).await?;
			}
		}
		Ok(())
	}
}

fn relation_label_valid(label: &str) -> bool {
	let mut chars = label.chars();
	match chars.next() {
		Some(c) if c.is_ascii_uppercase() => {}
		_ => return false,
	}
	chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
