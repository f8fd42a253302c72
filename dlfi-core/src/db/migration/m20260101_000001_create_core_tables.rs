//! Initial migration: nodes, tags, relationships, file_bindings, blobs, settings.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
	async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.create_table(
				Table::create()
					.table(Nodes::Table)
					.if_not_exists()
					.col(ColumnDef::new(Nodes::Uuid).uuid().not_null().primary_key())
					.col(ColumnDef::new(Nodes::NodeType).integer().not_null())
					.col(ColumnDef::new(Nodes::ParentUuid).uuid())
					.col(ColumnDef::new(Nodes::Name).string().not_null())
					.col(ColumnDef::new(Nodes::MetadataJson).text().not_null())
					.col(
						ColumnDef::new(Nodes::CreatedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.col(
						ColumnDef::new(Nodes::UpdatedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.foreign_key(
						ForeignKey::create()
							.name("fk_nodes_parent")
							.from(Nodes::Table, Nodes::ParentUuid)
							.to(Nodes::Table, Nodes::Uuid)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_nodes_parent_name")
					.table(Nodes::Table)
					.col(Nodes::ParentUuid)
					.col(Nodes::Name)
					.unique() // sibling names unique within a parent
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(Tags::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(Tags::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(Tags::NodeUuid).uuid().not_null())
					.col(ColumnDef::new(Tags::Tag).string().not_null())
					.col(ColumnDef::new(Tags::Position).integer().not_null())
					.foreign_key(
						ForeignKey::create()
							.from(Tags::Table, Tags::NodeUuid)
							.to(Nodes::Table, Nodes::Uuid)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_tags_node_tag")
					.table(Tags::Table)
					.col(Tags::NodeUuid)
					.col(Tags::Tag)
					.unique() // tags unique after lowercase normalization
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(Relationships::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(Relationships::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(Relationships::SourceUuid).uuid().not_null())
					.col(ColumnDef::new(Relationships::TargetUuid).uuid().not_null())
					.col(ColumnDef::new(Relationships::Relation).string().not_null())
					.foreign_key(
						ForeignKey::create()
							.from(Relationships::Table, Relationships::SourceUuid)
							.to(Nodes::Table, Nodes::Uuid)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.foreign_key(
						ForeignKey::create()
							.from(Relationships::Table, Relationships::TargetUuid)
							.to(Nodes::Table, Nodes::Uuid)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_relationships_unique_edge")
					.table(Relationships::Table)
					.col(Relationships::SourceUuid)
					.col(Relationships::TargetUuid)
					.col(Relationships::Relation)
					.unique() // (source, target, relation) must be unique
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(Blobs::Table)
					.if_not_exists()
					.col(ColumnDef::new(Blobs::Hash).string().not_null().primary_key())
					.col(ColumnDef::new(Blobs::Size).big_integer().not_null())
					.col(ColumnDef::new(Blobs::RefCount).integer().not_null().default(0))
					.col(ColumnDef::new(Blobs::PinCount).integer().not_null().default(0))
					.col(
						ColumnDef::new(Blobs::Encrypted)
							.boolean()
							.not_null()
							.default(false),
					)
					.col(ColumnDef::new(Blobs::PartitionLocation).string())
					.col(
						ColumnDef::new(Blobs::Tombstoned)
							.boolean()
							.not_null()
							.default(false),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(FileBindings::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(FileBindings::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(FileBindings::RecordUuid).uuid().not_null())
					.col(ColumnDef::new(FileBindings::Position).integer().not_null())
					.col(ColumnDef::new(FileBindings::DisplayName).string().not_null())
					.col(ColumnDef::new(FileBindings::BlobHash).string().not_null())
					.foreign_key(
						ForeignKey::create()
							.from(FileBindings::Table, FileBindings::RecordUuid)
							.to(Nodes::Table, Nodes::Uuid)
							.on_delete(ForeignKeyAction::Cascade),
					)
					.foreign_key(
						ForeignKey::create()
							.from(FileBindings::Table, FileBindings::BlobHash)
							.to(Blobs::Table, Blobs::Hash),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_file_bindings_record_position")
					.table(FileBindings::Table)
					.col(FileBindings::RecordUuid)
					.col(FileBindings::Position)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(Settings::Table)
					.if_not_exists()
					.col(ColumnDef::new(Settings::Id).integer().not_null().primary_key())
					.col(ColumnDef::new(Settings::SettingsJson).text().not_null())
					.to_owned(),
			)
			.await?;

		Ok(())
	}

	async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.drop_table(Table::drop().table(Settings::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(FileBindings::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(Blobs::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(Relationships::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(Tags::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(Nodes::Table).to_owned())
			.await?;
		Ok(())
	}
}

#[derive(DeriveIden)]
enum Nodes {
	Table,
	Uuid,
	NodeType,
	ParentUuid,
	Name,
	MetadataJson,
	CreatedAt,
	UpdatedAt,
}

#[derive(DeriveIden)]
enum Tags {
	Table,
	Id,
	NodeUuid,
	Tag,
	Position,
}

#[derive(DeriveIden)]
enum Relationships {
	Table,
	Id,
	SourceUuid,
	TargetUuid,
	Relation,
}

#[derive(DeriveIden)]
enum Blobs {
	Table,
	Hash,
	Size,
	RefCount,
	PinCount,
	Encrypted,
	PartitionLocation,
	Tombstoned,
}

#[derive(DeriveIden)]
enum FileBindings {
	Table,
	Id,
	RecordUuid,
	Position,
	DisplayName,
	BlobHash,
}

#[derive(DeriveIden)]
enum Settings {
	Table,
	Id,
	SettingsJson,
}
