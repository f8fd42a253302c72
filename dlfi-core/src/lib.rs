//! DL-FI core: a local-first digital asset manager over a hierarchical
//! namespace of Vaults and Records, a directed-labeled relationship graph,
//! a content-addressable encrypted blob store, a query language, and a
//! static exporter.

pub mod archive;
pub mod blob;
pub mod cancel;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod export;
pub mod extractor;
pub mod ingest;
pub mod lock;
pub mod path;
pub mod query;

pub use archive::{Archive, VacuumReport};
pub use config::ArchiveConfig;
pub use error::{DlfiError, Result};
pub use path::NodeId;
