//! Shared wiring for the integration tests.
//!
//! Builds a full engine over in-memory backends and keeps handles to each
//! backend so tests can inspect or tamper with state directly.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use filequota::cache::MemoryCounterStore;
use filequota::events::{BroadcastEventSink, LifecycleEvent};
use filequota::file::{FileManager, FileSettings};
use filequota::quota::{QuotaManager, QuotaSettings};
use filequota::repository::{MemoryRepository, MetadataRepository};
use filequota::store::MemoryByteStore;
use filequota::thumbnail::ThumbnailGenerator;

pub const SECRET: &str = "integration-secret";

/// Returns a fixed payload naming the requested bounds.
pub struct StubThumbnailer;

#[async_trait]
impl ThumbnailGenerator for StubThumbnailer {
    async fn create_thumbnail(
        &self,
        _data: &[u8],
        _name: &str,
        max_width: u32,
        max_height: u32,
    ) -> anyhow::Result<Vec<u8>> {
        Ok(format!("thumb {max_width}x{max_height}").into_bytes())
    }
}

pub struct TestStack {
    pub files: FileManager,
    pub quota: Arc<QuotaManager>,
    pub store: MemoryByteStore,
    pub repo: MemoryRepository,
    pub counters: MemoryCounterStore,
    pub sink: Arc<BroadcastEventSink>,
    pub events: broadcast::Receiver<LifecycleEvent>,
}

impl TestStack {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> TestStackBuilder {
        TestStackBuilder::default()
    }

    /// Event names received so far.
    pub fn drain_events(&mut self) -> Vec<&'static str> {
        let mut names = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            names.push(event.name());
        }
        names
    }
}

#[derive(Default)]
pub struct TestStackBuilder {
    quota: QuotaSettings,
    files: Option<FileSettings>,
    repository: Option<Arc<dyn MetadataRepository>>,
    repo: Option<MemoryRepository>,
}

impl TestStackBuilder {
    pub fn quota_settings(mut self, settings: QuotaSettings) -> Self {
        self.quota = settings;
        self
    }

    pub fn file_settings(mut self, settings: FileSettings) -> Self {
        self.files = Some(settings);
        self
    }

    /// Routes repository calls through `wrapper`; `inner` is the memory
    /// repository it delegates to.
    pub fn repository(mut self, wrapper: Arc<dyn MetadataRepository>, inner: MemoryRepository) -> Self {
        self.repository = Some(wrapper);
        self.repo = Some(inner);
        self
    }

    pub fn build(self) -> TestStack {
        let store = MemoryByteStore::new();
        let counters = MemoryCounterStore::new();
        let repo = self.repo.unwrap_or_default();
        let repository = self
            .repository
            .unwrap_or_else(|| Arc::new(repo.clone()));
        let sink = Arc::new(BroadcastEventSink::new());
        let events = sink.subscribe();

        let quota = Arc::new(QuotaManager::new(
            Arc::new(counters.clone()),
            Arc::clone(&repository),
            sink.clone(),
            self.quota,
        ));
        let settings = self.files.unwrap_or_else(|| FileSettings {
            signing_secret: Some(SECRET.to_string()),
            public_base_url: "https://cdn.example.test/p".to_string(),
            ..FileSettings::default()
        });
        let files = FileManager::new(
            Arc::new(store.clone()),
            repository,
            Arc::clone(&quota),
            sink.clone(),
            Arc::new(StubThumbnailer),
            settings,
        );

        TestStack {
            files,
            quota,
            store,
            repo,
            counters,
            sink,
            events,
        }
    }
}
