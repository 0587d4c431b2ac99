//! Live filesystem watching
//!
//! Mirrors filesystem change notifications into the catalog. Each event is
//! handled in its own transaction scope, independent of any running sync;
//! renames seen here are applied as delete+ingest without content-hash
//! correlation (that detection belongs to the reconciler's sync pass).

use crate::catalog::Catalog;
use crate::config::Config;
use crate::describe::Describer;
use crate::error::Result;
use crate::storage::{hash_file_content, NewImage};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const DEBOUNCE: Duration = Duration::from_millis(500);

pub struct Watcher {
    pub thread_handle: Option<thread::JoinHandle<()>>,
}

impl Watcher {
    /// Spawn the watcher thread over the configured scan directories.
    pub fn start(
        catalog: Arc<Mutex<Catalog>>,
        describer: Arc<dyn Describer + Send + Sync>,
        config: Config,
    ) -> Result<Self> {
        let handle = thread::spawn(move || {
            Self::watcher_loop(catalog, describer, config);
        });
        Ok(Self { thread_handle: Some(handle) })
    }

    fn watcher_loop(
        catalog: Arc<Mutex<Catalog>>,
        describer: Arc<dyn Describer + Send + Sync>,
        config: Config,
    ) {
        let (tx, rx) = mpsc::channel();
        let mut watcher = match RecommendedWatcher::new(tx, notify::Config::default()) {
            Ok(watcher) => watcher,
            Err(e) => {
                tracing::error!("Failed to create filesystem watcher: {}", e);
                return;
            }
        };

        for dir in &config.scan_directories {
            if !dir.exists() {
                tracing::warn!("Not watching missing directory: {}", dir.display());
                continue;
            }
            match watcher.watch(dir, RecursiveMode::Recursive) {
                Ok(()) => tracing::info!("Watching: {}", dir.display()),
                Err(e) => tracing::error!("Failed to watch {}: {}", dir.display(), e),
            }
        }

        let mut event_queue: HashMap<PathBuf, Event> = HashMap::new();
        let mut last_activity = Instant::now();

        loop {
            match rx.recv_timeout(Duration::from_millis(50)) {
                Ok(Ok(event)) => {
                    if matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) {
                        for path in &event.paths {
                            event_queue.insert(path.clone(), event.clone());
                        }
                        last_activity = Instant::now();
                    }
                }
                Ok(Err(e)) => tracing::warn!("Watcher error: {}", e),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if !event_queue.is_empty() && last_activity.elapsed() >= DEBOUNCE {
                        let events = std::mem::take(&mut event_queue);
                        let mut seen: Vec<(EventKind, Vec<PathBuf>)> = Vec::new();
                        for (_path, event) in events {
                            // A rename event lands in the queue once per path.
                            if seen.iter().any(|(k, p)| *k == event.kind && *p == event.paths) {
                                continue;
                            }
                            seen.push((event.kind.clone(), event.paths.clone()));

                            let catalog = match catalog.lock() {
                                Ok(guard) => guard,
                                Err(poisoned) => poisoned.into_inner(),
                            };
                            if let Err(e) =
                                handle_event(&catalog, describer.as_ref(), &config, &event)
                            {
                                tracing::error!("Failed to handle watch event: {}", e);
                            }
                        }
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    tracing::info!("Watch channel closed, stopping watcher");
                    return;
                }
            }
        }
    }
}

/// Apply one filesystem event to the catalog, inside one transaction scope.
/// Errors are returned to the loop, logged there, and do not stop watching.
pub fn handle_event(
    catalog: &Catalog,
    describer: &dyn Describer,
    config: &Config,
    event: &Event,
) -> Result<()> {
    match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            let (src, dst) = (&event.paths[0], &event.paths[1]);
            if !config.is_supported(dst) {
                return Ok(());
            }
            tracing::info!("Watch: moved {} -> {}", src.display(), dst.display());
            let src_path = src.to_string_lossy().to_string();
            catalog.transaction(|cat| {
                cat.delete_image(&src_path)?;
                ingest_path(cat, describer, dst)
            })
        }
        EventKind::Create(_) | EventKind::Modify(_) => {
            for path in &event.paths {
                if !config.is_supported(path) || !path.is_file() {
                    continue;
                }
                tracing::info!("Watch: ingesting {}", path.display());
                catalog.transaction(|cat| ingest_path(cat, describer, path))?;
            }
            Ok(())
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                if !config.is_supported(path) {
                    continue;
                }
                tracing::info!("Watch: removing {}", path.display());
                let path_str = path.to_string_lossy().to_string();
                catalog.transaction(|cat| cat.delete_image(&path_str))?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn ingest_path(catalog: &Catalog, describer: &dyn Describer, path: &Path) -> Result<()> {
    let mut image = NewImage::from_fs(path)?;
    image.content_hash = Some(hash_file_content(path)?);
    let description = describer.describe(path)?;
    catalog.add_image(&image, &description)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::storage::{image_id, MetadataStore, SemanticIndex};

    fn setup() -> (tempfile::TempDir, tempfile::TempDir, Catalog, Config) {
        let data = tempfile::tempdir().unwrap();
        let photos = tempfile::tempdir().unwrap();
        let meta = MetadataStore::open(&data.path().join("catalog.db")).unwrap();
        let index = SemanticIndex::open(
            &data.path().join("semantic"),
            Box::new(HashingEmbedder::new(64)),
        )
        .unwrap();
        let config = Config {
            scan_directories: vec![photos.path().to_path_buf()],
            supported_formats: vec![".jpg".to_string()],
            data_dir: data.path().to_path_buf(),
            batch_size: 100,
        };
        (data, photos, Catalog::new(meta, index), config)
    }

    fn describer() -> crate::describe::PlaceholderDescriber {
        crate::describe::PlaceholderDescriber
    }

    #[test]
    fn create_event_ingests_the_file() {
        let (_data, photos, catalog, config) = setup();
        let path = photos.path().join("a.jpg");
        std::fs::write(&path, [0u8; 128]).unwrap();

        let event = Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(path.clone());
        handle_event(&catalog, &describer(), &config, &event).unwrap();

        let id = image_id(&path.to_string_lossy());
        assert!(catalog.get_image_by_id(&id).unwrap().is_some());
        assert_eq!(catalog.semantic().count().unwrap(), 1);
    }

    #[test]
    fn remove_event_deletes_the_pair() {
        let (_data, photos, catalog, config) = setup();
        let path = photos.path().join("a.jpg");
        std::fs::write(&path, [0u8; 128]).unwrap();
        let create = Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(path.clone());
        handle_event(&catalog, &describer(), &config, &create).unwrap();

        std::fs::remove_file(&path).unwrap();
        let remove = Event::new(EventKind::Remove(notify::event::RemoveKind::File))
            .add_path(path.clone());
        handle_event(&catalog, &describer(), &config, &remove).unwrap();

        assert_eq!(catalog.metadata().count().unwrap(), 0);
        assert_eq!(catalog.semantic().count().unwrap(), 0);
    }

    #[test]
    fn rename_event_moves_the_pair_to_the_new_path() {
        let (_data, photos, catalog, config) = setup();
        let src = photos.path().join("a.jpg");
        std::fs::write(&src, [0u8; 128]).unwrap();
        let create = Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(src.clone());
        handle_event(&catalog, &describer(), &config, &create).unwrap();

        let dst = photos.path().join("b.jpg");
        std::fs::rename(&src, &dst).unwrap();
        let rename = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(src.clone())
            .add_path(dst.clone());
        handle_event(&catalog, &describer(), &config, &rename).unwrap();

        assert_eq!(catalog.metadata().count().unwrap(), 1);
        assert!(catalog
            .get_image_by_id(&image_id(&src.to_string_lossy()))
            .unwrap()
            .is_none());
        assert!(catalog
            .get_image_by_id(&image_id(&dst.to_string_lossy()))
            .unwrap()
            .is_some());
    }

    #[test]
    fn unsupported_paths_are_ignored() {
        let (_data, photos, catalog, config) = setup();
        let path = photos.path().join("notes.txt");
        std::fs::write(&path, b"text").unwrap();

        let event = Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(path);
        handle_event(&catalog, &describer(), &config, &event).unwrap();
        assert_eq!(catalog.metadata().count().unwrap(), 0);
    }
}
