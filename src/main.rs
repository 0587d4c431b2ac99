// src/main.rs

use anyhow::Result;
use pixdex::{
    audit, Catalog, Config, FastEmbedder, MetadataStore, PlaceholderDescriber, Reconciler,
    SemanticIndex,
};
use std::env;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("pixdex.toml"));
    let config = Config::load(&config_path)?;

    if config.scan_directories.is_empty() {
        eprintln!("No scan_directories configured in {}", config_path.display());
        return Ok(());
    }

    tracing::info!("pixdex starting");
    tracing::info!("Data directory: {}", config.data_dir.display());

    let meta = MetadataStore::open(&config.metadata_db_path())?;
    let index = SemanticIndex::open(&config.semantic_index_dir(), Box::new(FastEmbedder::new()?))?;
    let catalog = Catalog::new(meta, index);
    tracing::info!("Stores ready");

    let describer = PlaceholderDescriber;

    // One full reconciliation pass before going live.
    let reconciler = Reconciler::new(&catalog, &describer, &config);
    let report = reconciler.sync(&config.scan_directories)?;
    tracing::info!(
        "Initial sync: {} removed, {} ingested, audit healed {}+{}",
        report.deleted,
        report.outcomes.len(),
        report.audit.removed_from_metadata,
        report.audit.removed_from_index
    );

    // Hand the catalog to the watcher and stay resident.
    let catalog = Arc::new(Mutex::new(catalog));
    let watcher = pixdex::watch::Watcher::start(
        Arc::clone(&catalog),
        Arc::new(PlaceholderDescriber),
        config,
    )?;
    tracing::info!("Watching for changes (ctrl-c to exit)");

    if let Some(handle) = watcher.thread_handle {
        let _ = handle.join();
    }

    // Final audit on the way out keeps the stores converged for next start.
    let catalog = catalog.lock().unwrap_or_else(|e| e.into_inner());
    let _ = audit::audit(&catalog);

    Ok(())
}
