//! Catalog: the transactional coordinator over both stores
//!
//! Owns the metadata store and the semantic index and keeps their writes
//! ordered. Inside a transaction scope, relational writes apply immediately
//! (read-your-writes) while index writes are queued and drained only after
//! the relational commit succeeds. There is no cross-store atomicity; the
//! inconsistency window left by a failed index write is closed by the
//! auditor, not retried inline.

use crate::error::{CatalogError, Result};
use crate::storage::{image_id, ImageRecord, MetadataStore, NewImage, SemanticIndex};
use std::cell::{Cell, RefCell};

/// Deferred semantic-index write, recorded while a transaction is active.
#[derive(Debug, Clone)]
enum PendingOp {
    AddDescription { file_path: String, description: String },
    DeleteDescription { file_path: String },
}

/// Search result after hydration against the metadata store.
///
/// An index entry with no relational counterpart is reported, not silently
/// dropped, so callers can tell a missing join from an empty result set.
#[derive(Debug, Clone)]
pub enum SearchHit {
    Hydrated {
        record: ImageRecord,
        score: f32,
    },
    Unhydratable {
        id: String,
        file_path: String,
        description: String,
        score: f32,
    },
}

pub struct Catalog {
    meta: MetadataStore,
    index: SemanticIndex,
    depth: Cell<u32>,
    pending: RefCell<Vec<PendingOp>>,
}

impl Catalog {
    pub fn new(meta: MetadataStore, index: SemanticIndex) -> Self {
        Self {
            meta,
            index,
            depth: Cell::new(0),
            pending: RefCell::new(Vec::new()),
        }
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.meta
    }

    pub fn semantic(&self) -> &SemanticIndex {
        &self.index
    }

    pub fn in_transaction(&self) -> bool {
        self.depth.get() > 0
    }

    /// Run `f` inside a transaction scope. Scopes nest: only the outermost
    /// entry opens a real relational transaction, inner entries just track
    /// depth. The depth counter is balanced on every exit path.
    ///
    /// On outermost success the relational transaction commits first; only
    /// then is the pending queue drained into the index (failures logged,
    /// accepted). On error the relational transaction rolls back, the queue
    /// is discarded untouched, and the error propagates.
    pub fn transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let outermost = self.depth.get() == 0;
        self.depth.set(self.depth.get() + 1);

        if !outermost {
            let result = f(self);
            self.depth.set(self.depth.get() - 1);
            return result;
        }

        self.pending.borrow_mut().clear();
        if let Err(e) = self.meta.begin() {
            self.depth.set(self.depth.get() - 1);
            return Err(e);
        }

        let result = f(self);
        self.depth.set(self.depth.get() - 1);

        match result {
            Ok(value) => {
                if let Err(e) = self.meta.commit() {
                    self.pending.borrow_mut().clear();
                    if let Err(rb) = self.meta.rollback() {
                        tracing::error!("Rollback after failed commit also failed: {}", rb);
                    }
                    return Err(e);
                }
                self.drain_pending();
                Ok(value)
            }
            Err(e) => {
                self.pending.borrow_mut().clear();
                if let Err(rb) = self.meta.rollback() {
                    tracing::error!("Rollback failed: {}", rb);
                }
                Err(e)
            }
        }
    }

    /// Apply queued index writes after a successful relational commit.
    /// A failing operation is logged and skipped; the relational commit has
    /// already happened and the auditor will reconcile the divergence.
    fn drain_pending(&self) {
        let ops = std::mem::take(&mut *self.pending.borrow_mut());
        for op in ops {
            let outcome = match &op {
                PendingOp::AddDescription { file_path, description } => {
                    self.index.add(file_path, description).map(|_| ())
                }
                PendingOp::DeleteDescription { file_path } => {
                    self.index.delete(file_path).map(|_| ())
                }
            };
            if let Err(e) = outcome {
                tracing::error!("Deferred index write failed (audit will heal): {:?}: {}", op, e);
            }
        }
    }

    /// Upsert a record pair. Returns the path-derived id.
    ///
    /// Outside a transaction the two writes apply in order, with a
    /// best-effort compensating relational delete if the index write fails.
    /// A crash between the two steps leaves a relational-only orphan for the
    /// auditor.
    pub fn add_image(&self, image: &NewImage, description: &str) -> Result<String> {
        let id = image_id(&image.file_path);
        self.meta.upsert(image)?;

        if self.in_transaction() {
            self.pending.borrow_mut().push(PendingOp::AddDescription {
                file_path: image.file_path.clone(),
                description: description.to_string(),
            });
            return Ok(id);
        }

        if let Err(e) = self.index.add(&image.file_path, description) {
            tracing::error!("Index write failed for {}, compensating: {}", image.file_path, e);
            if let Err(comp) = self.meta.delete_by_path(&image.file_path) {
                tracing::error!("Compensating delete failed for {}: {}", image.file_path, comp);
            }
            return Err(CatalogError::PartialFailure(format!(
                "semantic index write failed for {}: {}",
                image.file_path, e
            )));
        }
        Ok(id)
    }

    /// Delete the record pair for a path, per the active-transaction rule.
    pub fn delete_image(&self, file_path: &str) -> Result<()> {
        self.meta.delete_by_path(file_path)?;

        if self.in_transaction() {
            self.pending.borrow_mut().push(PendingOp::DeleteDescription {
                file_path: file_path.to_string(),
            });
            return Ok(());
        }

        if let Err(e) = self.index.delete(file_path) {
            return Err(CatalogError::PartialFailure(format!(
                "relational delete committed but index delete failed for {}: {}",
                file_path, e
            )));
        }
        Ok(())
    }

    pub fn get_image_by_id(&self, id: &str) -> Result<Option<ImageRecord>> {
        self.meta.get_by_id(id)
    }

    pub fn get_all_records(&self) -> Result<Vec<ImageRecord>> {
        self.meta.get_all()
    }

    /// Nearest-description search, hydrated by id from the metadata store.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let hits = self.index.search(query, limit)?;
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            match self.meta.get_by_id(&hit.id)? {
                Some(record) => results.push(SearchHit::Hydrated { record, score: hit.score }),
                None => {
                    tracing::warn!("Search hit with no catalog record: {}", hit.file_path);
                    results.push(SearchHit::Unhydratable {
                        id: hit.id,
                        file_path: hit.file_path,
                        description: hit.description,
                        score: hit.score,
                    });
                }
            }
        }
        Ok(results)
    }

    /// Administrative reset of both stores.
    pub fn clear_catalog(&self) -> Result<()> {
        self.meta.drop_table()?;
        self.index.clear_all()?;
        tracing::info!("Catalog cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{HashingEmbedder, TextEmbedder};
    use crate::error::CatalogError;
    use std::path::Path;

    struct FailingEmbedder;

    impl TextEmbedder for FailingEmbedder {
        fn embed(&mut self, _texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Err(CatalogError::Embedding("model unavailable".into()))
        }

        fn dim(&self) -> usize {
            64
        }
    }

    fn catalog_with(embedder: Box<dyn TextEmbedder>) -> (tempfile::TempDir, Catalog) {
        let dir = tempfile::tempdir().unwrap();
        let meta = MetadataStore::open(&dir.path().join("catalog.db")).unwrap();
        let index = SemanticIndex::open(&dir.path().join("semantic"), embedder).unwrap();
        (dir, Catalog::new(meta, index))
    }

    fn catalog() -> (tempfile::TempDir, Catalog) {
        catalog_with(Box::new(HashingEmbedder::new(64)))
    }

    fn sample(path: &str) -> NewImage {
        NewImage {
            file_path: path.to_string(),
            file_name: Path::new(path)
                .file_name()
                .unwrap()
                .to_string_lossy()
                .to_string(),
            file_size: 5000,
            content_hash: None,
            created_time: 1_700_000_000,
            modified_time: 1_700_000_100,
        }
    }

    #[test]
    fn add_outside_transaction_writes_both_stores() {
        let (_dir, catalog) = catalog();
        let id = catalog.add_image(&sample("/photos/a.jpg"), "a red bicycle").unwrap();

        assert!(catalog.get_image_by_id(&id).unwrap().is_some());
        assert_eq!(catalog.semantic().count().unwrap(), 1);
    }

    #[test]
    fn index_writes_are_deferred_until_commit() {
        let (_dir, catalog) = catalog();
        catalog
            .transaction(|cat| {
                cat.add_image(&sample("/photos/a.jpg"), "desc a")?;
                cat.add_image(&sample("/photos/b.jpg"), "desc b")?;
                // Relational writes visible inside the scope, index untouched.
                assert_eq!(cat.metadata().count().unwrap(), 2);
                assert_eq!(cat.semantic().count().unwrap(), 0);
                Ok(())
            })
            .unwrap();

        assert_eq!(catalog.metadata().count().unwrap(), 2);
        assert_eq!(catalog.semantic().count().unwrap(), 2);
    }

    #[test]
    fn error_inside_scope_rolls_back_and_discards_queue() {
        let (_dir, catalog) = catalog();
        let result: Result<()> = catalog.transaction(|cat| {
            cat.add_image(&sample("/photos/a.jpg"), "desc a")?;
            Err(CatalogError::Embedding("simulated index failure".into()))
        });

        assert!(result.is_err());
        assert_eq!(catalog.metadata().count().unwrap(), 0);
        assert_eq!(catalog.semantic().count().unwrap(), 0);
        assert!(!catalog.in_transaction());
    }

    #[test]
    fn nested_scopes_commit_once_at_the_outermost_exit() {
        let (_dir, catalog) = catalog();
        catalog
            .transaction(|outer| {
                outer.transaction(|inner| {
                    inner.add_image(&sample("/photos/a.jpg"), "desc a")?;
                    Ok(())
                })?;
                // Inner exit must not have drained the queue.
                assert_eq!(outer.semantic().count().unwrap(), 0);
                assert!(outer.in_transaction());
                Ok(())
            })
            .unwrap();

        assert_eq!(catalog.semantic().count().unwrap(), 1);
    }

    #[test]
    fn inner_scope_error_propagates_and_rolls_back_everything() {
        let (_dir, catalog) = catalog();
        let result: Result<()> = catalog.transaction(|outer| {
            outer.add_image(&sample("/photos/a.jpg"), "desc a")?;
            outer.transaction(|_inner| {
                Err(CatalogError::Embedding("inner failure".into()))
            })
        });

        assert!(result.is_err());
        assert_eq!(catalog.metadata().count().unwrap(), 0);
    }

    #[test]
    fn failed_index_write_triggers_compensating_delete() {
        let (_dir, catalog) = catalog_with(Box::new(FailingEmbedder));
        let result = catalog.add_image(&sample("/photos/a.jpg"), "desc");

        assert!(matches!(result, Err(CatalogError::PartialFailure(_))));
        assert_eq!(catalog.metadata().count().unwrap(), 0);
    }

    #[test]
    fn delete_inside_transaction_defers_index_delete() {
        let (_dir, catalog) = catalog();
        catalog.add_image(&sample("/photos/a.jpg"), "desc a").unwrap();

        catalog
            .transaction(|cat| {
                cat.delete_image("/photos/a.jpg")?;
                assert_eq!(cat.semantic().count().unwrap(), 1);
                Ok(())
            })
            .unwrap();

        assert_eq!(catalog.metadata().count().unwrap(), 0);
        assert_eq!(catalog.semantic().count().unwrap(), 0);
    }

    #[test]
    fn search_separates_hydrated_from_unhydratable_hits() {
        let (_dir, catalog) = catalog();
        catalog.add_image(&sample("/photos/a.jpg"), "a dog on a beach").unwrap();
        // Index-only orphan, as left behind by a crash between store writes.
        catalog.semantic().add("/photos/ghost.jpg", "a dog in a park").unwrap();

        let hits = catalog.search("dog", 10).unwrap();
        assert_eq!(hits.len(), 2);

        let hydrated = hits
            .iter()
            .filter(|h| matches!(h, SearchHit::Hydrated { .. }))
            .count();
        let unhydratable = hits
            .iter()
            .filter(|h| matches!(h, SearchHit::Unhydratable { .. }))
            .count();
        assert_eq!((hydrated, unhydratable), (1, 1));
    }

    #[test]
    fn round_trip_preserves_metadata_through_coordinator() {
        let (_dir, catalog) = catalog();
        let image = sample("/photos/a.jpg");
        let id = catalog.add_image(&image, "desc").unwrap();

        let record = catalog.get_image_by_id(&id).unwrap().unwrap();
        assert_eq!(record.file_path, image.file_path);
        assert_eq!(record.file_size, image.file_size);
        assert_eq!(record.modified_time, image.modified_time);
    }
}
