//! pixdex: transactional image catalog
//!
//! Derives structured metadata and a searchable description per image file,
//! persists both across two heterogeneous stores, and keeps the stores
//! consistent with each other and with the filesystem:
//! - Catalog (transaction coordinator over MetadataStore + SemanticIndex)
//! - Reconciler (directory scan + diff + bounded batch writes)
//! - Auditor (cross-store orphan removal, runs before every sync)
//! - Watcher (live change notifications, one transaction per event)

pub mod audit;
pub mod catalog;
pub mod config;
pub mod describe;
pub mod embedding;
pub mod error;
pub mod reconcile;
pub mod storage;
pub mod watch;

pub use catalog::{Catalog, SearchHit};
pub use config::Config;
pub use describe::{Describer, PlaceholderDescriber};
pub use embedding::{FastEmbedder, HashingEmbedder, TextEmbedder};
pub use error::{CatalogError, Result};
pub use reconcile::{IngestOutcome, Reconciler, SyncReport};
pub use storage::{
    hash_file_content, image_id, ImageRecord, MetadataStore, NewImage, SemanticIndex,
};
