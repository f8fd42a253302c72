//! Query engine: tokenizer, parser, planner, and autocomplete over
//! an in-memory snapshot of the metadata store.

pub mod ast;
pub mod autocomplete;
pub mod parser;
pub mod plan;
pub mod token;

pub use ast::{Clause, Expr};
pub use autocomplete::{classify, Position, Suggestion};

use crate::db::{MetadataStore, NodeSummary, RelationshipSummary};
use crate::error::Result;
use crate::path::NodeId;
use std::collections::{HashMap, HashSet};

/// A point-in-time snapshot of every node and relationship, built once per
/// query/autocomplete call so planning never re-hits the database per atom.
pub struct QueryIndex {
	nodes: HashMap<NodeId, NodeSummary>,
	children: HashMap<NodeId, Vec<NodeId>>,
	path_to_uuid: HashMap<String, NodeId>,
	relationships: Vec<RelationshipSummary>,
}

impl QueryIndex {
	pub async fn build(store: &MetadataStore) -> Result<Self> {
		let nodes = store.all_nodes().await?;
		let relationships = store.all_relationships().await?;

		let mut by_uuid = HashMap::with_capacity(nodes.len());
		let mut children: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
		let mut path_to_uuid = HashMap::with_capacity(nodes.len());

		for n in &nodes {
			if let Some(parent) = n.parent_uuid {
				children.entry(parent).or_default().push(n.uuid);
			}
			path_to_uuid.insert(n.path.clone(), n.uuid);
		}
		for n in nodes {
			by_uuid.insert(n.uuid, n);
		}

		Ok(Self {
			nodes: by_uuid,
			children,
			path_to_uuid,
			relationships,
		})
	}

	pub fn universe(&self) -> HashSet<NodeId> {
		self.nodes.keys().copied().collect()
	}

	/// Strict descendants of `root`, via BFS over the in-memory children map.
	pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
		let mut out = Vec::new();
		let mut frontier = vec![root];
		while let Some(current) = frontier.pop() {
			if let Some(kids) = self.children.get(&current) {
				for &k in kids {
					out.push(k);
					frontier.push(k);
				}
			}
		}
		out
	}

	pub fn get(&self, id: NodeId) -> Option<&NodeSummary> {
		self.nodes.get(&id)
	}
}

/// Parse + plan + sort in one call. Results are sorted by (type VAULT
/// first, path asc) for stable, deterministic output.
pub async fn execute(store: &MetadataStore, query_text: &str) -> Result<Vec<NodeSummary>> {
	let expr = parser::parse(query_text)?;
	let index = QueryIndex::build(store).await?;
	let matched = plan::eval(&expr, &index);

	let mut results: Vec<NodeSummary> = matched
		.into_iter()
		.filter_map(|id| index.nodes.get(&id).cloned())
		.collect();
	results.sort_by(|a, b| {
		let a_vault = a.node_type == crate::db::entities::node::NodeType::Vault;
		let b_vault = b.node_type == crate::db::entities::node::NodeType::Vault;
		b_vault.cmp(&a_vault).then_with(|| a.path.cmp(&b.path))
	});
	Ok(results)
}

/// Build a fresh snapshot and classify `(query_text, cursor)` into typed
/// suggestions.
pub async fn autocomplete(
	store: &MetadataStore,
	query_text: &str,
	cursor: usize,
) -> Result<Vec<Suggestion>> {
	let index = QueryIndex::build(store).await?;
	Ok(autocomplete::suggest(&index, query_text, cursor))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::db::migration::Migrator;
	use sea_orm::Database;
	use sea_orm_migration::MigratorTrait;
	use serde_json::json;

	async fn test_store() -> MetadataStore {
		let conn = Database::connect("sqlite::memory:").await.unwrap();
		Migrator::up(&conn, None).await.unwrap();
		MetadataStore::new(conn)
	}

	#[tokio::test]
	async fn filters_by_type_and_tag_intersection() {
		let store = test_store().await;
		let manga = store.create_vault("library/manga").await.unwrap();
		let jojo = store
			.create_record("library/manga/jojo-ch1", json!({}))
			.await
			.unwrap();
		store.add_tag(jojo, "action").await.unwrap();
		store.add_tag(manga, "action").await.unwrap();

		let results = execute(&store, "type:RECORD tag:action").await.unwrap();
		assert_eq!(results.len(), 1);
		assert_eq!(results[0].uuid, jojo);
	}

	#[tokio::test]
	async fn inside_clause_matches_descendants_not_self() {
		let store = test_store().await;
		let _vault = store.create_vault("library/manga").await.unwrap();
		let record = store
			.create_record("library/manga/jojo-ch1", json!({}))
			.await
			.unwrap();

		let results = execute(&store, "inside:library/manga").await.unwrap();
		assert_eq!(results.len(), 1);
		assert_eq!(results[0].uuid, record);
	}

	#[tokio::test]
	async fn negation_excludes_matches() {
		let store = test_store().await;
		let a = store.create_record("a", json!({})).await.unwrap();
		let b = store.create_record("b", json!({})).await.unwrap();
		store.add_tag(a, "keep").await.unwrap();

		let results = execute(&store, "-tag:keep").await.unwrap();
		let uuids: Vec<_> = results.iter().map(|n| n.uuid).collect();
		assert!(uuids.contains(&b));
		assert!(!uuids.contains(&a));
	}

	#[tokio::test]
	async fn empty_query_returns_universe_sorted_vault_first() {
		let store = test_store().await;
		store.create_vault("z-vault").await.unwrap();
		store.create_record("a-record", json!({})).await.unwrap();

		let results = execute(&store, "").await.unwrap();
		assert_eq!(results.len(), 2);
		assert_eq!(results[0].node_type, crate::db::entities::node::NodeType::Vault);
	}

	#[tokio::test]
	async fn meta_eq_matches_literal_values() {
		let store = test_store().await;
		let r = store
			.create_record("r", json!({"year": 2005}))
			.await
			.unwrap();
		let results = execute(&store, "meta.year=2005").await.unwrap();
		assert_eq!(results.len(), 1);
		assert_eq!(results[0].uuid, r);
	}
}
