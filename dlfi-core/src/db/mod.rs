//! Metadata store — the canonical truth.

pub mod entities;
pub mod migration;
mod store;

pub use store::{
	FileBindingSummary, MetadataStore, NewBlobInfo, NodeSummary, RelationshipSummary,
	UpdateNodePatch,
};

use crate::error::Result;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::path::Path;

/// Open (creating if absent) the `db.sqlite` connection and run pending
/// migrations. Foreign keys are enabled explicitly: SQLite defaults them
/// off, and the cascades the schema relies on for recursive delete and
/// relationship cleanup depend on them being on.
pub async fn open(db_path: &Path) -> Result<DatabaseConnection> {
	let url = format!("sqlite://{}?mode=rwc", db_path.display());
	let mut opts = ConnectOptions::new(url);
	opts.sqlx_logging(false);
	let conn = Database::connect(opts).await?;
	conn.execute_unprepared("PRAGMA foreign_keys = ON;").await?;
	migration::Migrator::up(&conn, None).await?;
	Ok(conn)
}
