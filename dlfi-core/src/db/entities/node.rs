//! `nodes` table — the canonical namespace.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "nodes")]
pub struct Model {
	#[sea_orm(primary_key, auto_increment = false)]
	pub uuid: Uuid,
	/// Discriminant column: 0 = VAULT, 1 = RECORD.
	pub node_type: i32,
	/// Nullable; root nodes have no parent.
	pub parent_uuid: Option<Uuid>,
	pub name: String,
	/// JSON object; never an array at the top level.
	pub metadata_json: String,
	pub created_at: DateTimeUtc,
	pub updated_at: DateTimeUtc,
}

// A self-referential `parent_uuid -> uuid` edge exists conceptually but is
// resolved with plain filtered queries in `MetadataStore` rather than a
// sea-orm `Related` self-join, which needs table aliasing the derive macro
// doesn't generate for free.
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(has_many = "super::tag::Entity")]
	Tags,
	#[sea_orm(has_many = "super::file_binding::Entity")]
	Files,
}

impl Related<super::tag::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Tags.def()
	}
}

impl Related<super::file_binding::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Files.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}

/// Node discriminant.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
	Vault = 0,
	Record = 1,
}

impl From<i32> for NodeType {
	fn from(value: i32) -> Self {
		match value {
			1 => NodeType::Record,
			_ => NodeType::Vault,
		}
	}
}

impl From<NodeType> for i32 {
	fn from(t: NodeType) -> Self {
		t as i32
	}
}

impl Model {
	pub fn node_type(&self) -> NodeType {
		NodeType::from(self.node_type)
	}

	pub fn is_vault(&self) -> bool {
		self.node_type() == NodeType::Vault
	}
}
