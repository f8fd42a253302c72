//! `blobs` table — content-addressed blob index.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "blobs")]
pub struct Model {
	/// Lowercase hex SHA-256 of the plaintext; the blob's address.
	#[sea_orm(primary_key, auto_increment = false)]
	pub hash: String,
	pub size: i64,
	/// Bindings referencing this blob, plus explicit pins. Cached sum of
	/// `binding_count + pin_count`, recomputed transactionally on every
	/// mutation that touches either term.
	pub ref_count: i32,
	/// Explicit pins (holds on a blob with no binding, e.g. thumbnails).
	pub pin_count: i32,
	pub encrypted: bool,
	/// None in loose mode; `Some("<partition_id>:<offset>:<length>")` in
	/// partition mode. Kept as a single column rather than three so loose
	/// and partitioned rows share one schema without nullable triples.
	pub partition_location: Option<String>,
	/// Set once ref_count reaches zero; physically reclaimed only by
	/// `vacuum()`.
	pub tombstoned: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(has_many = "super::file_binding::Entity")]
	FileBindings,
}

impl Related<super::file_binding::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::FileBindings.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}

/// Parsed `(partition_id, offset, length)` location, see `partition_location`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionLocation {
	pub partition_id: u32,
	pub offset: u64,
	pub length: u64,
}

impl PartitionLocation {
	pub fn encode(&self) -> String {
		format!("{}:{}:{}", self.partition_id, self.offset, self.length)
	}

	pub fn parse(s: &str) -> Option<Self> {
		let mut parts = s.split(':');
		let partition_id = parts.next()?.parse().ok()?;
		let offset = parts.next()?.parse().ok()?;
		let length = parts.next()?.parse().ok()?;
		Some(Self {
			partition_id,
			offset,
			length,
		})
	}
}
