//! Filesystem reconciliation
//!
//! Diffs the catalog against the configured directories and drives the
//! coordinator to close the gap. The diff itself is cheap (size/mtime only);
//! content hashing happens only for files that look new, to tell a genuine
//! new file from a moved one.
//!
//! Failure policy is deliberately asymmetric and the report makes it
//! visible: deletions run in all-or-nothing batches (a failed batch fails
//! the whole sync), while additions/modifications are tolerated per file so
//! one bad image cannot stall the rest of the run.

use crate::audit::{self, AuditReport};
use crate::catalog::Catalog;
use crate::config::Config;
use crate::describe::Describer;
use crate::error::Result;
use crate::storage::{hash_file_content, ImageRecord, NewImage};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Cheap per-file facts from the walk. No content hash in this pass.
#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub size: u64,
    pub mtime: i64,
}

/// Per-file result of the additions/modifications phase.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Added { path: PathBuf },
    Updated { path: PathBuf },
    Moved { from: PathBuf, to: PathBuf },
    Failed { path: PathBuf, error: String },
}

/// What one sync run did.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub audit: AuditReport,
    /// Records removed because their files vanished. All-or-nothing per
    /// batch: if any batch fails the sync fails.
    pub deleted: usize,
    pub delete_batches: usize,
    /// Per-file outcomes of the tolerant ingest phase.
    pub outcomes: Vec<IngestOutcome>,
}

pub struct Reconciler<'a> {
    catalog: &'a Catalog,
    describer: &'a dyn Describer,
    config: &'a Config,
}

impl<'a> Reconciler<'a> {
    pub fn new(catalog: &'a Catalog, describer: &'a dyn Describer, config: &'a Config) -> Self {
        Self { catalog, describer, config }
    }

    /// Recursive walk of `dirs`, filtered by the extension allowlist.
    /// Missing directories and unreadable entries are logged and skipped.
    pub fn scan_directories(&self, dirs: &[PathBuf]) -> BTreeMap<PathBuf, FileStat> {
        let mut files = BTreeMap::new();
        for dir in dirs {
            if !dir.exists() {
                tracing::warn!("Scan directory does not exist: {}", dir.display());
                continue;
            }
            for entry in walkdir::WalkDir::new(dir).follow_links(false) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!("Skipping unreadable entry: {}", e);
                        continue;
                    }
                };
                let path = entry.path();
                if !path.is_file() || !self.config.is_supported(path) {
                    continue;
                }
                match entry.metadata() {
                    Ok(meta) => {
                        let mtime = meta
                            .modified()
                            .ok()
                            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                            .map(|d| d.as_secs() as i64)
                            .unwrap_or(0);
                        files.insert(
                            path.to_path_buf(),
                            FileStat { size: meta.len(), mtime },
                        );
                    }
                    Err(e) => tracing::warn!("Failed to stat {}: {}", path.display(), e),
                }
            }
        }
        files
    }

    /// Reconcile the catalog with the filesystem.
    pub fn sync(&self, dirs: &[PathBuf]) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        // 1. Heal any divergence left by a previous run before diffing.
        report.audit = audit::audit(self.catalog)?;

        // 2. Catalog snapshot, keyed two ways: by path for the diff, by
        //    content hash for move detection. The keys stay distinct.
        let records = self.catalog.get_all_records()?;
        let by_path: HashMap<String, ImageRecord> =
            records.iter().map(|r| (r.file_path.clone(), r.clone())).collect();
        let by_hash: HashMap<String, ImageRecord> = records
            .iter()
            .filter_map(|r| r.content_hash.clone().map(|h| (h, r.clone())))
            .collect();

        // 3. Filesystem snapshot.
        let fs_files = self.scan_directories(dirs);
        let fs_paths: HashSet<String> =
            fs_files.keys().map(|p| p.to_string_lossy().to_string()).collect();

        // 4. Deletions, batched. Descriptions of the doomed records are
        //    captured first so a move detected in step 5 can reuse them.
        let mut deleted_paths: Vec<&String> =
            by_path.keys().filter(|p| !fs_paths.contains(*p)).collect();
        deleted_paths.sort();

        let mut salvaged_descriptions: HashMap<String, String> = HashMap::new();
        for path in &deleted_paths {
            let id = &by_path[*path].id;
            if let Some(entry) = self.catalog.semantic().get(id)? {
                salvaged_descriptions.insert(id.clone(), entry.description);
            }
        }

        for batch in deleted_paths.chunks(self.config.batch_size) {
            self.catalog.transaction(|cat| {
                for path in batch {
                    tracing::info!("Removing record for missing file: {}", path);
                    cat.delete_image(path)?;
                }
                Ok(())
            })?;
            report.delete_batches += 1;
            report.deleted += batch.len();
        }

        // 5. Additions and modifications, tolerated per file.
        for (path, stat) in &fs_files {
            let path_str = path.to_string_lossy().to_string();
            let existing = by_path.get(&path_str);
            let is_new = existing.is_none();
            let is_modified = existing.map_or(false, |r| {
                stat.size != r.file_size || stat.mtime > r.modified_time
            });
            if !is_new && !is_modified {
                continue;
            }

            match self.ingest_file(path, is_new, &by_hash, &salvaged_descriptions) {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) => {
                    tracing::error!("Failed to ingest {}: {}", path.display(), e);
                    report.outcomes.push(IngestOutcome::Failed {
                        path: path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "Sync complete: {} deleted ({} batches), {} ingested/moved/failed",
            report.deleted,
            report.delete_batches,
            report.outcomes.len()
        );
        Ok(report)
    }

    /// Ingest one new or modified file inside its own transaction scope.
    fn ingest_file(
        &self,
        path: &Path,
        is_new: bool,
        by_hash: &HashMap<String, ImageRecord>,
        salvaged_descriptions: &HashMap<String, String>,
    ) -> Result<IngestOutcome> {
        let mut image = NewImage::from_fs(path)?;
        let content_hash = hash_file_content(path)?;
        image.content_hash = Some(content_hash.clone());

        // A "new" path whose content hash already exists in the catalog is a
        // moved file: drop the old path's pair and ingest under the new one.
        // The old description is reused, so the describer runs once per
        // distinct content item rather than once per path.
        let moved_from = if is_new {
            by_hash
                .get(&content_hash)
                .filter(|old| old.file_path != image.file_path)
                .cloned()
        } else {
            None
        };

        let description = if let Some(old) = &moved_from {
            let salvaged = match salvaged_descriptions.get(&old.id) {
                Some(desc) => Some(desc.clone()),
                None => self.catalog.semantic().get(&old.id)?.map(|e| e.description),
            };
            match salvaged {
                Some(desc) => desc,
                None => self.describer.describe(path)?,
            }
        } else {
            self.describer.describe(path)?
        };

        self.catalog.transaction(|cat| {
            if let Some(old) = &moved_from {
                tracing::info!("Detected move: {} -> {}", old.file_path, path.display());
                cat.delete_image(&old.file_path)?;
            }
            cat.add_image(&image, &description)?;
            Ok(())
        })?;

        Ok(match moved_from {
            Some(old) => IngestOutcome::Moved {
                from: PathBuf::from(old.file_path),
                to: path.to_path_buf(),
            },
            None if is_new => IngestOutcome::Added { path: path.to_path_buf() },
            None => IngestOutcome::Updated { path: path.to_path_buf() },
        })
    }
}
