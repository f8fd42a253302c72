//! `relationships` table — directed labeled edges.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "relationships")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i32,
	pub source_uuid: Uuid,
	pub target_uuid: Uuid,
	/// Non-empty uppercase identifier, validated against `/^[A-Z][A-Z0-9_]*$/`.
	pub relation: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
