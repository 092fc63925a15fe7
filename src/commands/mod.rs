//! CLI command implementations for filequota.
//!
//! - [`quota`] - inspect and change tenant quotas
//! - [`monitor`] - periodic or one-shot usage reconciliation
//! - [`files`] - upload, list and delete files
//! - [`check_config`] - validate the configuration file

pub mod files;
pub mod monitor;
pub mod quota;

use anyhow::{Context, Result};
use std::fs;
use std::sync::Arc;
use tracing::{debug, warn};

use filequota::cache::RedbCounterStore;
use filequota::config::Config;
use filequota::events::TracingEventSink;
use filequota::file::FileManager;
use filequota::quota::QuotaManager;
use filequota::repository::SqliteRepository;
use filequota::store::FilesystemByteStore;
use filequota::thumbnail::UnavailableThumbnailer;

/// The wired-up engine backed by the on-disk stores under `storage.data_dir`.
pub struct Engine {
    pub quota: Arc<QuotaManager>,
    pub files: FileManager,
}

impl Engine {
    /// Opens (creating if needed) the object directory, counter store and
    /// metadata database.
    pub fn open(config: &Config) -> Result<Self> {
        let storage = &config.storage;
        fs::create_dir_all(&storage.data_dir).with_context(|| {
            format!("Failed to create data dir: {}", storage.data_dir.display())
        })?;

        let store = Arc::new(FilesystemByteStore::open(storage.objects_dir())?);
        let counters = Arc::new(RedbCounterStore::open(storage.counters_path())?);
        let repository = Arc::new(SqliteRepository::open(storage.metadata_path())?);
        let events = Arc::new(TracingEventSink);
        debug!(data_dir = %storage.data_dir.display(), "Opened backends");

        let quota = Arc::new(QuotaManager::new(
            counters,
            repository.clone(),
            events.clone(),
            config.quota_settings()?,
        ));
        let files = FileManager::new(
            store,
            repository,
            Arc::clone(&quota),
            events,
            Arc::new(UnavailableThumbnailer),
            config.file_settings(),
        );

        Ok(Self { quota, files })
    }
}

/// Validate the configuration and print the outcome.
pub fn check_config(config: &Config) -> Result<()> {
    let result = config.validate()?;
    for warning in &result.warnings {
        warn!("{warning}");
        println!("warning: {warning}");
    }
    println!(
        "Configuration OK (data dir: {})",
        config.storage.data_dir.display()
    );
    Ok(())
}
