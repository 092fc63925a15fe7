use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncReadExt;
use tokio::sync::broadcast;

use super::*;
use crate::cache::MemoryCounterStore;
use crate::error::Error;
use crate::events::{BroadcastEventSink, EventSink, LifecycleEvent};
use crate::quota::{QuotaManager, QuotaSettings};
use crate::repository::{MemoryRepository, MetadataRepository};
use crate::store::{ByteStore, MemoryByteStore};
use crate::thumbnail::{ThumbnailGenerator, UnavailableThumbnailer};

const SECRET: &str = "test-secret";

struct FixedThumbnailer;

#[async_trait]
impl ThumbnailGenerator for FixedThumbnailer {
    async fn create_thumbnail(
        &self,
        _data: &[u8],
        _name: &str,
        _max_width: u32,
        _max_height: u32,
    ) -> anyhow::Result<Vec<u8>> {
        Ok(b"thumb".to_vec())
    }
}

/// Delegates to a memory repository but refuses to create records.
struct RejectingRepository(MemoryRepository);

#[async_trait]
impl MetadataRepository for RejectingRepository {
    async fn create(&self, _record: &FileRecord) -> anyhow::Result<()> {
        bail!("database is read-only")
    }
    async fn update(&self, record: &FileRecord) -> anyhow::Result<bool> {
        self.0.update(record).await
    }
    async fn delete(&self, id: &str) -> anyhow::Result<bool> {
        self.0.delete(id).await
    }
    async fn get_by_id(&self, id: &str) -> anyhow::Result<Option<FileRecord>> {
        self.0.get_by_id(id).await
    }
    async fn sum_size_by_owner(&self, tenant_id: &str) -> anyhow::Result<i64> {
        self.0.sum_size_by_owner(tenant_id).await
    }
    async fn all_owners_with_files(&self) -> anyhow::Result<Vec<String>> {
        self.0.all_owners_with_files().await
    }
    async fn list_by_owner(&self, tenant_id: &str) -> anyhow::Result<Vec<FileRecord>> {
        self.0.list_by_owner(tenant_id).await
    }
}

/// Delegates to a memory repository but refuses to update records.
struct FrozenRepository(MemoryRepository);

#[async_trait]
impl MetadataRepository for FrozenRepository {
    async fn create(&self, record: &FileRecord) -> anyhow::Result<()> {
        self.0.create(record).await
    }
    async fn update(&self, _record: &FileRecord) -> anyhow::Result<bool> {
        bail!("lock wait timeout exceeded")
    }
    async fn delete(&self, id: &str) -> anyhow::Result<bool> {
        self.0.delete(id).await
    }
    async fn get_by_id(&self, id: &str) -> anyhow::Result<Option<FileRecord>> {
        self.0.get_by_id(id).await
    }
    async fn sum_size_by_owner(&self, tenant_id: &str) -> anyhow::Result<i64> {
        self.0.sum_size_by_owner(tenant_id).await
    }
    async fn all_owners_with_files(&self) -> anyhow::Result<Vec<String>> {
        self.0.all_owners_with_files().await
    }
    async fn list_by_owner(&self, tenant_id: &str) -> anyhow::Result<Vec<FileRecord>> {
        self.0.list_by_owner(tenant_id).await
    }
}

/// Sink that rejects every event.
struct FailingEventSink;

impl EventSink for FailingEventSink {
    fn publish(&self, _event: LifecycleEvent) -> anyhow::Result<()> {
        bail!("event bus unreachable")
    }
}

struct Harness {
    files: FileManager,
    quota: Arc<QuotaManager>,
    store: MemoryByteStore,
    repo: MemoryRepository,
    events: broadcast::Receiver<LifecycleEvent>,
}

fn build(
    repository: Arc<dyn MetadataRepository>,
    repo: MemoryRepository,
    thumbnails: Arc<dyn ThumbnailGenerator>,
) -> Harness {
    let store = MemoryByteStore::new();
    let sink = Arc::new(BroadcastEventSink::new());
    let events = sink.subscribe();
    let quota = Arc::new(QuotaManager::new(
        Arc::new(MemoryCounterStore::new()),
        Arc::clone(&repository),
        sink.clone(),
        QuotaSettings::default(),
    ));
    let settings = FileSettings {
        public_base_url: "https://files.test/public/".to_string(),
        signing_secret: Some(SECRET.to_string()),
        ..FileSettings::default()
    };
    let files = FileManager::new(
        Arc::new(store.clone()),
        repository,
        Arc::clone(&quota),
        sink,
        thumbnails,
        settings,
    );
    Harness {
        files,
        quota,
        store,
        repo,
        events,
    }
}

fn harness() -> Harness {
    let repo = MemoryRepository::new();
    build(Arc::new(repo.clone()), repo, Arc::new(FixedThumbnailer))
}

fn drain(rx: &mut broadcast::Receiver<LifecycleEvent>) -> Vec<&'static str> {
    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(event.name());
    }
    names
}

async fn read_all(stream: FileStream) -> Vec<u8> {
    let mut reader = stream.reader;
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();
    out
}

fn doc(tenant: &str, len: usize) -> NewFile {
    NewFile::new("obj-1", tenant, "report.pdf", vec![7u8; len]).actor("alice")
}

#[tokio::test]
async fn test_create_stores_bytes_and_charges_quota() {
    let mut h = harness();
    h.quota.set_quota("t1", 1000).await.unwrap();

    let file = h.files.create(doc("t1", 400)).await.unwrap();

    assert_eq!(file.record.size, 400);
    assert_eq!(file.record.content_type, "application/pdf");
    assert_eq!(file.record.path, format!("t1/{}/report.pdf", file.id()));
    assert_eq!(file.record.created_by, "alice");
    assert_eq!(file.record.storage_provider, "local");
    assert_eq!(
        file.extras.metadata.as_ref().map(|m| m.category),
        Some(FileCategory::Document)
    );
    assert!(file.urls.is_none());

    assert_eq!(h.store.get(&file.record.path).await.unwrap().unwrap().len(), 400);
    assert_eq!(h.repo.len(), 1);
    assert_eq!(h.quota.get_usage("t1").await.unwrap(), 400);
    assert_eq!(drain(&mut h.events), vec!["file_created"]);
}

#[tokio::test]
async fn test_create_over_quota_writes_nothing() {
    let h = harness();
    h.quota.set_quota("t1", 1000).await.unwrap();
    h.files.create(doc("t1", 900)).await.unwrap();

    let err = h.files.create(doc("t1", 200)).await.unwrap_err();

    match err {
        Error::QuotaExceeded {
            requested,
            used,
            limit,
            ..
        } => {
            assert_eq!(requested, 200);
            assert_eq!(used, 900);
            assert_eq!(limit, 1000);
        },
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.store.len(), 1);
    assert_eq!(h.repo.len(), 1);
    assert_eq!(h.quota.get_usage("t1").await.unwrap(), 900);
}

#[tokio::test]
async fn test_create_rejects_missing_fields_and_bad_paths() {
    let h = harness();

    for input in [
        NewFile::new("", "t1", "a.txt", b"x".to_vec()),
        NewFile::new("o", "", "a.txt", b"x".to_vec()),
        NewFile::new("o", "t1", " ", b"x".to_vec()),
        NewFile::new("o", "t1", "a.txt", b"x".to_vec()).path("../escape"),
        NewFile::new("o", "t1", "a.txt", b"x".to_vec()).path("/abs"),
    ] {
        assert!(matches!(
            h.files.create(input).await,
            Err(Error::Validation(_))
        ));
    }
    assert!(h.store.is_empty());
    assert_eq!(h.quota.get_usage("t1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_failed_metadata_write_compensates() {
    let repo = MemoryRepository::new();
    let h = build(
        Arc::new(RejectingRepository(repo.clone())),
        repo,
        Arc::new(FixedThumbnailer),
    );
    h.quota.set_quota("t1", 1000).await.unwrap();

    let input = NewFile::new("o", "t1", "cat.png", vec![1u8; 100]).with_thumbnail();
    let err = h.files.create(input).await.unwrap_err();

    assert!(matches!(
        err,
        Error::BackendUnavailable {
            backend: "repository",
            ..
        }
    ));
    assert!(h.store.is_empty(), "orphans left: {:?}", h.store.paths());
    assert_eq!(h.quota.get_usage("t1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_thumbnail_for_images_only() {
    let h = harness();

    let image = h
        .files
        .create(NewFile::new("o", "t1", "cat.png", vec![1u8; 10]).with_thumbnail())
        .await
        .unwrap();
    let thumb = image.thumbnail_path().unwrap().to_string();
    assert_eq!(thumb, format!("thumbnails/{}", image.record.path));
    assert_eq!(h.store.get(&thumb).await.unwrap().unwrap(), b"thumb");

    let text = h
        .files
        .create(NewFile::new("o", "t1", "notes.txt", b"hi".to_vec()).with_thumbnail())
        .await
        .unwrap();
    assert!(text.thumbnail_path().is_none());

    let plain = h
        .files
        .create(NewFile::new("o", "t1", "dog.png", b"hi".to_vec()))
        .await
        .unwrap();
    assert!(plain.thumbnail_path().is_none());
}

#[tokio::test]
async fn test_thumbnail_failure_is_not_fatal() {
    let repo = MemoryRepository::new();
    let h = build(
        Arc::new(repo.clone()),
        repo,
        Arc::new(UnavailableThumbnailer),
    );

    let file = h
        .files
        .create(NewFile::new("o", "t1", "cat.png", vec![1u8; 10]).with_thumbnail())
        .await
        .unwrap();

    assert!(file.thumbnail_path().is_none());
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn test_update_content_adjusts_usage() {
    let mut h = harness();
    h.quota.set_quota("t1", 1000).await.unwrap();
    let file = h.files.create(doc("t1", 300)).await.unwrap();

    let grown = h
        .files
        .update(
            file.id(),
            FileUpdate {
                content: Some(vec![1u8; 500]),
                actor: "bob".to_string(),
                ..FileUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(grown.record.size, 500);
    assert_eq!(grown.record.updated_by, "bob");
    assert_eq!(h.quota.get_usage("t1").await.unwrap(), 500);

    let too_big = FileUpdate {
        content: Some(vec![1u8; 1200]),
        ..FileUpdate::default()
    };
    assert!(h.store.get(&file.record.path).await.unwrap().is_none());
    assert!(matches!(
        h.files.update(file.id(), too_big).await,
        Err(Error::QuotaExceeded { .. })
    ));
    assert_eq!(
        h.store.get(&grown.record.path).await.unwrap().unwrap().len(),
        500
    );

    let shrunk = FileUpdate {
        content: Some(vec![1u8; 100]),
        ..FileUpdate::default()
    };
    let shrunk = h.files.update(file.id(), shrunk).await.unwrap();
    assert_eq!(h.quota.get_usage("t1").await.unwrap(), 100);
    assert_eq!(shrunk.record.path.matches(".rev-").count(), 1);
    assert_eq!(h.store.len(), 1);
    assert_eq!(
        drain(&mut h.events),
        vec![
            "file_created",
            "file_updated",
            "storage_quota_exceeded",
            "file_updated"
        ]
    );
}

#[tokio::test]
async fn test_update_patches_extras_and_keeps_unknown_attributes() {
    let h = harness();
    let file = h.files.create(doc("t1", 10)).await.unwrap();

    let mut record = h.repo.get_by_id(file.id()).await.unwrap().unwrap();
    record
        .attributes
        .insert("color".to_string(), serde_json::json!("blue"));
    h.repo.update(&record).await.unwrap();

    let updated = h
        .files
        .update(
            file.id(),
            FileUpdate {
                name: Some("final.pdf".to_string()),
                extras: ExtrasPatch::default()
                    .folder_path("/reports")
                    .tags(["q3", "finance"]),
                ..FileUpdate::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.record.name, "final.pdf");
    assert_eq!(updated.extras.folder_path.as_deref(), Some("/reports"));
    assert_eq!(updated.extras.tags, vec!["q3", "finance"]);
    assert_eq!(updated.record.attributes["color"], "blue");
    assert_eq!(h.quota.get_usage("t1").await.unwrap(), 10);
}

#[tokio::test]
async fn test_update_missing_file() {
    let h = harness();
    assert!(matches!(
        h.files.update("nope", FileUpdate::default()).await,
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_delete_releases_quota_and_objects() {
    let mut h = harness();
    h.quota.set_quota("t1", 1000).await.unwrap();
    let file = h
        .files
        .create(NewFile::new("o", "t1", "cat.png", vec![1u8; 250]).with_thumbnail())
        .await
        .unwrap();
    assert_eq!(h.store.len(), 2);

    let deleted = h.files.delete(file.id(), "carol").await.unwrap();

    assert_eq!(deleted.id(), file.id());
    assert!(h.store.is_empty());
    assert!(h.repo.is_empty());
    assert_eq!(h.quota.get_usage("t1").await.unwrap(), 0);
    assert_eq!(drain(&mut h.events), vec!["file_created", "file_deleted"]);

    assert!(matches!(
        h.files.delete(file.id(), "carol").await,
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_delete_tolerates_missing_bytes() {
    let h = harness();
    let file = h.files.create(doc("t1", 40)).await.unwrap();
    h.store.delete(&file.record.path).await.unwrap();

    h.files.delete(file.id(), "").await.unwrap();
    assert!(h.repo.is_empty());
    assert_eq!(h.quota.get_usage("t1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_version_chain() {
    let h = harness();
    let v1 = h
        .files
        .create(
            doc("t1", 10).extras(ExtrasPatch::default().folder_path("/docs").tags(["draft"])),
        )
        .await
        .unwrap();
    let v2 = h
        .files
        .create_version(v1.id(), vec![2u8; 20], "report.pdf", "bob")
        .await
        .unwrap();
    let v3 = h
        .files
        .create_version(v2.id(), vec![3u8; 30], "report.pdf", "bob")
        .await
        .unwrap();

    assert_eq!(v3.versions(), [v1.id().to_string(), v2.id().to_string()]);
    assert_eq!(v3.extras.folder_path.as_deref(), Some("/docs"));
    assert_eq!(v3.extras.tags, vec!["draft"]);
    assert_eq!(v3.record.path, format!("versions/{}/report.pdf", v3.id()));
    assert_eq!(v3.record.object_id, "obj-1");

    let chain = h.files.get_versions(v3.id()).await.unwrap();
    let ids: Vec<&str> = chain.iter().map(StoredFile::id).collect();
    assert_eq!(ids, vec![v1.id(), v2.id(), v3.id()]);

    // Every version is charged.
    assert_eq!(h.quota.get_usage("t1").await.unwrap(), 60);

    h.files.delete(v1.id(), "").await.unwrap();
    let chain = h.files.get_versions(v3.id()).await.unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[1].id(), v3.id());
}

#[tokio::test]
async fn test_set_access_level() {
    let h = harness();
    let file = h.files.create(doc("t1", 10)).await.unwrap();

    let public = h
        .files
        .set_access_level(file.id(), "public", "admin")
        .await
        .unwrap();
    assert_eq!(public.extras.access_level, AccessLevel::Public);
    assert!(public.extras.is_public);
    assert!(public.urls.is_some());

    let shared = h
        .files
        .set_access_level(file.id(), "shared", "admin")
        .await
        .unwrap();
    assert!(!shared.extras.is_public);
    assert!(shared.urls.is_none());

    assert!(matches!(
        h.files.set_access_level(file.id(), "world", "admin").await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn test_public_url_round_trip() {
    let h = harness();
    let file = h.files.create(doc("t1", 10)).await.unwrap();

    let link = h.files.generate_public_url(file.id(), 0).await.unwrap();
    let expected = Utc::now().timestamp() + 24 * 3600;
    assert!((link.expires_at - expected).abs() <= 5);
    assert_eq!(link.url, format!("https://files.test/public/{}", link.token));

    let stored = h.files.get(file.id()).await.unwrap();
    assert!(stored.extras.is_public);
    assert_eq!(stored.urls.map(|u| u.url), Some(link.url.clone()));

    let stream = h.files.open_public(&link.token).await.unwrap();
    assert_eq!(stream.file.id(), file.id());
    assert_eq!(read_all(stream).await, vec![7u8; 10]);
}

#[tokio::test]
async fn test_public_access_requires_public_file() {
    let h = harness();
    let file = h.files.create(doc("t1", 10)).await.unwrap();
    let link = h.files.generate_public_url(file.id(), 1).await.unwrap();

    h.files
        .set_access_level(file.id(), "private", "admin")
        .await
        .unwrap();

    assert!(matches!(
        h.files.open_public(&link.token).await,
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_expired_signed_token_rejected_without_lookup() {
    let h = harness();
    let token = TokenSigner::new(Some(SECRET)).issue("no-such-file", Some(1_000));

    assert!(matches!(
        h.files.open_public(&token).await,
        Err(Error::Expired { expired_at: 1_000, .. })
    ));
    assert!(matches!(
        h.files.open_public("garbage").await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn test_public_thumbnail() {
    let h = harness();
    let image = h
        .files
        .create(NewFile::new("o", "t1", "cat.png", vec![1u8; 10]).with_thumbnail())
        .await
        .unwrap();
    let link = h.files.generate_public_url(image.id(), 2).await.unwrap();

    let stored = h.files.get(image.id()).await.unwrap();
    assert_eq!(
        stored.urls.and_then(|u| u.thumbnail_url),
        Some(format!("{}/thumbnail", link.url))
    );

    let thumb = h.files.open_public_thumbnail(&link.token).await.unwrap();
    assert_eq!(read_all(thumb).await, b"thumb");

    let text = h.files.create(doc("t1", 5)).await.unwrap();
    let link = h.files.generate_public_url(text.id(), 2).await.unwrap();
    assert!(matches!(
        h.files.open_public_thumbnail(&link.token).await,
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_stream_of_expired_file() {
    let mut h = harness();
    let file = h.files.create(doc("t1", 10)).await.unwrap();

    let live = h.files.get_file_stream(file.id()).await.unwrap();
    assert_eq!(read_all(live).await.len(), 10);

    let past = Utc::now().timestamp() - 60;
    h.files
        .update(
            file.id(),
            FileUpdate {
                extras: ExtrasPatch::default().expires_at(Some(past)),
                ..FileUpdate::default()
            },
        )
        .await
        .unwrap();

    assert!(matches!(
        h.files.get_file_stream(file.id()).await,
        Err(Error::Expired { .. })
    ));
    assert_eq!(
        drain(&mut h.events),
        vec!["file_created", "file_accessed", "file_updated"]
    );
}

#[tokio::test]
async fn test_list_by_owner() {
    let h = harness();
    h.files.create(doc("t1", 1)).await.unwrap();
    h.files.create(doc("t1", 2)).await.unwrap();
    h.files.create(doc("t2", 3)).await.unwrap();

    assert_eq!(h.files.list_by_owner("t1").await.unwrap().len(), 2);
    assert!(h.files.list_by_owner("t3").await.unwrap().is_empty());
    assert!(matches!(
        h.files.list_by_owner("").await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn test_failed_update_keeps_stored_file() {
    let repo = MemoryRepository::new();
    let h = build(
        Arc::new(FrozenRepository(repo.clone())),
        repo,
        Arc::new(FixedThumbnailer),
    );
    h.quota.set_quota("t1", 1000).await.unwrap();
    let file = h
        .files
        .create(NewFile::new("o", "t1", "cat.png", vec![1u8; 300]).with_thumbnail())
        .await
        .unwrap();
    let thumb = file.thumbnail_path().unwrap().to_string();

    let err = h
        .files
        .update(
            file.id(),
            FileUpdate {
                content: Some(vec![2u8; 500]),
                ..FileUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let record = h.repo.get_by_id(file.id()).await.unwrap().unwrap();
    assert_eq!(record.size, 300);
    assert_eq!(record.extras().thumbnail_path.as_deref(), Some(thumb.as_str()));
    assert_eq!(h.store.get(&record.path).await.unwrap().unwrap(), vec![1u8; 300]);
    assert_eq!(h.store.get(&thumb).await.unwrap().unwrap(), b"thumb");
    assert_eq!(h.store.len(), 2);
    assert_eq!(h.quota.get_usage("t1").await.unwrap(), 300);
}

#[tokio::test]
async fn test_event_failures_do_not_change_results() {
    let repo = MemoryRepository::new();
    let store = MemoryByteStore::new();
    let quota = Arc::new(QuotaManager::new(
        Arc::new(MemoryCounterStore::new()),
        Arc::new(repo.clone()),
        Arc::new(FailingEventSink),
        QuotaSettings::default(),
    ));
    let files = FileManager::new(
        Arc::new(store.clone()),
        Arc::new(repo),
        Arc::clone(&quota),
        Arc::new(FailingEventSink),
        Arc::new(FixedThumbnailer),
        FileSettings::default(),
    );
    quota.set_quota("t1", 1000).await.unwrap();

    let file = files.create(doc("t1", 600)).await.unwrap();
    assert_eq!(quota.get_usage("t1").await.unwrap(), 600);

    assert!(matches!(
        files.create(doc("t1", 500)).await,
        Err(Error::QuotaExceeded { used: 600, limit: 1000, .. })
    ));
    assert_eq!(quota.get_usage("t1").await.unwrap(), 600);

    // Crosses the warning threshold.
    let updated = files
        .update(
            file.id(),
            FileUpdate {
                content: Some(vec![3u8; 850]),
                ..FileUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.record.size, 850);
    assert_eq!(quota.get_usage("t1").await.unwrap(), 850);

    let stream = files.get_file_stream(file.id()).await.unwrap();
    assert_eq!(read_all(stream).await, vec![3u8; 850]);

    let deleted = files.delete(file.id(), "admin").await.unwrap();
    assert_eq!(deleted.record.size, 850);
    assert_eq!(quota.get_usage("t1").await.unwrap(), 0);
    assert!(store.is_empty());
}
