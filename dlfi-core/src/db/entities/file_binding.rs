//! `files` table — ordered file bindings attached to RECORDs.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "file_bindings")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i32,
	pub record_uuid: Uuid,
	/// Record-local ordering; starts at 0 and is set to the current binding
	/// count at append time.
	pub position: i32,
	pub display_name: String,
	pub blob_hash: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(
		belongs_to = "super::node::Entity",
		from = "Column::RecordUuid",
		to = "super::node::Column::Uuid"
	)]
	Record,
	#[sea_orm(
		belongs_to = "super::blob::Entity",
		from = "Column::BlobHash",
		to = "super::blob::Column::Hash"
	)]
	Blob,
}

impl Related<super::node::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Record.def()
	}
}

impl Related<super::blob::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Blob.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}
