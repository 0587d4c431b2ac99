//! Consistency audit between the two stores
//!
//! The system has no cross-store atomicity; this is the substitute. The
//! audit compares the id sets of both stores and deletes orphans on either
//! side, writing directly through the stores rather than through transaction
//! scopes (it runs outside any logical image-transaction).

use crate::catalog::Catalog;
use crate::error::Result;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AuditReport {
    /// Relational-only orphans removed from the metadata store.
    pub removed_from_metadata: usize,
    /// Index-only orphans removed from the semantic index.
    pub removed_from_index: usize,
}

/// Run one audit pass. Called unconditionally at the start of every sync.
pub fn audit(catalog: &Catalog) -> Result<AuditReport> {
    let ids_meta = catalog.metadata().all_ids()?;
    let ids_index = catalog.semantic().all_ids()?;

    let mut report = AuditReport::default();

    for id in ids_meta.difference(&ids_index) {
        tracing::warn!("Audit: record without index entry, removing: {}", &id[..8]);
        if catalog.metadata().delete_by_id(id)? {
            report.removed_from_metadata += 1;
        }
    }

    for id in ids_index.difference(&ids_meta) {
        tracing::warn!("Audit: index entry without record, removing: {}", &id[..8]);
        if catalog.semantic().delete_by_id(id)? {
            report.removed_from_index += 1;
        }
    }

    if report != AuditReport::default() {
        tracing::info!(
            "Audit healed divergence: {} metadata orphans, {} index orphans",
            report.removed_from_metadata,
            report.removed_from_index
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::storage::{MetadataStore, NewImage, SemanticIndex};

    fn catalog() -> (tempfile::TempDir, Catalog) {
        let dir = tempfile::tempdir().unwrap();
        let meta = MetadataStore::open(&dir.path().join("catalog.db")).unwrap();
        let index =
            SemanticIndex::open(&dir.path().join("semantic"), Box::new(HashingEmbedder::new(64)))
                .unwrap();
        (dir, Catalog::new(meta, index))
    }

    fn sample(path: &str) -> NewImage {
        NewImage {
            file_path: path.to_string(),
            file_name: "img".to_string(),
            file_size: 100,
            content_hash: None,
            created_time: 0,
            modified_time: 0,
        }
    }

    #[test]
    fn consistent_stores_are_untouched() {
        let (_dir, catalog) = catalog();
        catalog.add_image(&sample("/photos/a.jpg"), "desc").unwrap();

        let report = audit(&catalog).unwrap();
        assert_eq!(report, AuditReport::default());
        assert_eq!(catalog.metadata().count().unwrap(), 1);
        assert_eq!(catalog.semantic().count().unwrap(), 1);
    }

    #[test]
    fn index_only_orphan_is_removed_leaving_metadata_untouched() {
        let (_dir, catalog) = catalog();
        catalog.add_image(&sample("/photos/a.jpg"), "desc").unwrap();
        catalog.semantic().add("/photos/ghost.jpg", "orphan entry").unwrap();

        let report = audit(&catalog).unwrap();
        assert_eq!(report.removed_from_index, 1);
        assert_eq!(report.removed_from_metadata, 0);
        assert_eq!(catalog.metadata().count().unwrap(), 1);
        assert_eq!(catalog.semantic().count().unwrap(), 1);
    }

    #[test]
    fn metadata_only_orphan_is_removed() {
        let (_dir, catalog) = catalog();
        // Relational write with no paired index write, as left by a crash.
        catalog.metadata().upsert(&sample("/photos/lost.jpg")).unwrap();

        let report = audit(&catalog).unwrap();
        assert_eq!(report.removed_from_metadata, 1);
        assert_eq!(catalog.metadata().count().unwrap(), 0);
    }
}
