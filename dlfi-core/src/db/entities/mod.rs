//! Metadata store entities.

pub mod blob;
pub mod file_binding;
pub mod node;
pub mod relationship;
pub mod settings;
pub mod tag;

pub use blob::Entity as BlobEntity;
pub use file_binding::Entity as FileBindingEntity;
pub use node::Entity as NodeEntity;
pub use relationship::Entity as RelationshipEntity;
pub use settings::Entity as SettingsEntity;
pub use tag::Entity as TagEntity;
