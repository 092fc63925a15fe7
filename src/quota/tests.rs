use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, watch};

use super::*;
use crate::cache::{CounterStore, MemoryCounterStore, RedbCounterStore, UnavailableCounterStore};
use crate::error::Error;
use crate::events::{BroadcastEventSink, LifecycleEvent};
use crate::file::FileRecord;
use crate::repository::{MemoryRepository, MetadataRepository};

struct Harness {
    manager: Arc<QuotaManager>,
    counters: MemoryCounterStore,
    repo: MemoryRepository,
    events: broadcast::Receiver<LifecycleEvent>,
}

fn harness_with(settings: QuotaSettings) -> Harness {
    let counters = MemoryCounterStore::new();
    let repo = MemoryRepository::new();
    let sink = Arc::new(BroadcastEventSink::new());
    let events = sink.subscribe();
    let manager = Arc::new(QuotaManager::new(
        Arc::new(counters.clone()),
        Arc::new(repo.clone()),
        sink,
        settings,
    ));
    Harness {
        manager,
        counters,
        repo,
        events,
    }
}

fn harness() -> Harness {
    harness_with(QuotaSettings::default())
}

fn drain(rx: &mut broadcast::Receiver<LifecycleEvent>) -> Vec<&'static str> {
    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(event.name());
    }
    names
}

fn record(id: &str, tenant: &str, size: i64) -> FileRecord {
    let now = Utc::now();
    FileRecord {
        id: id.to_string(),
        name: id.to_string(),
        path: format!("{tenant}/{id}"),
        content_type: "application/octet-stream".to_string(),
        size,
        storage_provider: "local".to_string(),
        bucket: "default".to_string(),
        endpoint: String::new(),
        object_id: "obj".to_string(),
        tenant_id: tenant.to_string(),
        attributes: Default::default(),
        created_by: String::new(),
        created_at: now,
        updated_by: String::new(),
        updated_at: now,
    }
}

struct BrokenRepository;

#[async_trait]
impl MetadataRepository for BrokenRepository {
    async fn create(&self, _record: &FileRecord) -> anyhow::Result<()> {
        bail!("connection refused")
    }
    async fn update(&self, _record: &FileRecord) -> anyhow::Result<bool> {
        bail!("connection refused")
    }
    async fn delete(&self, _id: &str) -> anyhow::Result<bool> {
        bail!("connection refused")
    }
    async fn get_by_id(&self, _id: &str) -> anyhow::Result<Option<FileRecord>> {
        bail!("connection refused")
    }
    async fn sum_size_by_owner(&self, _tenant_id: &str) -> anyhow::Result<i64> {
        bail!("connection refused")
    }
    async fn all_owners_with_files(&self) -> anyhow::Result<Vec<String>> {
        bail!("connection refused")
    }
    async fn list_by_owner(&self, _tenant_id: &str) -> anyhow::Result<Vec<FileRecord>> {
        bail!("connection refused")
    }
}

#[tokio::test]
async fn test_upload_rejected_past_limit() {
    let mut h = harness();
    h.manager.set_quota("acme", 1000).await.unwrap();

    assert!(h.manager.check_and_update_quota("acme", 600).await.unwrap());
    assert_eq!(h.manager.get_usage("acme").await.unwrap(), 600);

    assert!(!h.manager.check_and_update_quota("acme", 500).await.unwrap());
    assert_eq!(h.manager.get_usage("acme").await.unwrap(), 600);
    assert_eq!(drain(&mut h.events), vec!["storage_quota_exceeded"]);
}

#[tokio::test]
async fn test_warning_then_exceeded() {
    let mut h = harness();
    h.manager.set_quota("acme", 1000).await.unwrap();
    h.manager.check_and_update_quota("acme", 600).await.unwrap();
    assert!(drain(&mut h.events).is_empty());

    assert!(h.manager.check_and_update_quota("acme", 250).await.unwrap());
    assert_eq!(h.manager.get_usage("acme").await.unwrap(), 850);

    let event = h.events.try_recv().unwrap();
    match event {
        LifecycleEvent::StorageQuotaWarning(p) => {
            assert_eq!(p.usage, 850);
            assert_eq!(p.limit, 1000);
            assert!((p.percentage - 85.0).abs() < 1e-9);
        },
        other => panic!("unexpected event: {other:?}"),
    }

    assert!(!h.manager.check_and_update_quota("acme", 200).await.unwrap());
    assert_eq!(h.manager.get_usage("acme").await.unwrap(), 850);
    assert_eq!(drain(&mut h.events), vec!["storage_quota_exceeded"]);
}

#[tokio::test]
async fn test_enforcement_off_allows_and_tracks() {
    let h = harness_with(QuotaSettings {
        enforcement: false,
        ..QuotaSettings::default()
    });
    h.manager.set_quota("acme", 10).await.unwrap();

    assert!(h.manager.check_and_update_quota("acme", 11).await.unwrap());
    assert_eq!(h.manager.get_usage("acme").await.unwrap(), 11);
    assert!(h.manager.is_quota_exceeded("acme").await.unwrap());
}

#[tokio::test]
async fn test_disabled_tenant_passes() {
    let h = harness();
    h.manager.set_quota("acme", 10).await.unwrap();
    h.manager
        .set_enabled("acme", QuotaKind::Storage, false)
        .await
        .unwrap();

    assert!(h.manager.check_and_update_quota("acme", 50).await.unwrap());
    assert!(!h.manager.is_quota_exceeded("acme").await.unwrap());
    assert!(
        !h.manager
            .is_enabled("acme", QuotaKind::Storage)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_negative_delta_clamps_and_bypasses_limit() {
    let h = harness_with(QuotaSettings {
        enforcement: false,
        ..QuotaSettings::default()
    });
    h.manager.set_quota("acme", 100).await.unwrap();
    h.manager.check_and_update_quota("acme", 150).await.unwrap();

    let strict = QuotaManager::new(
        Arc::new(h.counters.clone()),
        Arc::new(h.repo.clone()),
        Arc::new(crate::events::NoopEventSink),
        QuotaSettings::default(),
    );
    // Over the limit already, but shrinking is always allowed.
    assert!(strict.check_and_update_quota("acme", -20).await.unwrap());
    assert_eq!(strict.get_usage("acme").await.unwrap(), 130);

    assert!(strict.check_and_update_quota("acme", -1_000).await.unwrap());
    assert_eq!(strict.get_usage("acme").await.unwrap(), 0);
}

#[tokio::test]
async fn test_usage_falls_back_to_repository() {
    let h = harness();
    h.repo.create(&record("a", "acme", 300)).await.unwrap();
    h.repo.create(&record("b", "acme", 200)).await.unwrap();

    assert_eq!(h.manager.get_usage("acme").await.unwrap(), 500);
    assert_eq!(
        h.counters.get("quota:storage:usage:acme").await.unwrap(),
        Some(500)
    );

    // Cached now; the repository is no longer consulted.
    h.repo.delete("a").await.unwrap();
    assert_eq!(h.manager.get_usage("acme").await.unwrap(), 500);
    assert_eq!(h.manager.recalculate_usage("acme").await.unwrap(), 200);
    assert_eq!(h.manager.get_usage("acme").await.unwrap(), 200);
}

#[tokio::test]
async fn test_default_quota_and_lazy_seed() {
    let h = harness();
    assert_eq!(
        h.manager.get_quota("acme").await.unwrap(),
        DEFAULT_STORAGE_QUOTA
    );
    assert_eq!(
        h.counters.get("quota:storage:limit:acme").await.unwrap(),
        None
    );
    assert!(!h.manager.is_quota_exceeded("acme").await.unwrap());

    h.manager.check_and_update_quota("acme", 1).await.unwrap();
    assert_eq!(
        h.counters.get("quota:storage:limit:acme").await.unwrap(),
        Some(DEFAULT_STORAGE_QUOTA)
    );
}

#[tokio::test]
async fn test_fail_open_on_repository_error() {
    let counters = MemoryCounterStore::new();
    let manager = QuotaManager::new(
        Arc::new(counters.clone()),
        Arc::new(BrokenRepository),
        Arc::new(crate::events::NoopEventSink),
        QuotaSettings::default(),
    );
    manager.set_quota("acme", 10).await.unwrap();

    let err = manager.get_usage("acme").await.unwrap_err();
    assert!(matches!(
        err,
        Error::BackendUnavailable {
            backend: "repository",
            ..
        }
    ));

    assert!(manager.check_and_update_quota("acme", 1_000).await.unwrap());
    assert_eq!(
        counters.get("quota:storage:usage:acme").await.unwrap(),
        None
    );
}

#[tokio::test]
async fn test_unavailable_shared_store_still_enforces_locally() {
    let manager = QuotaManager::new(
        Arc::new(UnavailableCounterStore),
        Arc::new(MemoryRepository::new()),
        Arc::new(crate::events::NoopEventSink),
        QuotaSettings::default(),
    );
    manager.set_quota("acme", 100).await.unwrap();

    assert!(manager.check_and_update_quota("acme", 100).await.unwrap());
    assert!(!manager.check_and_update_quota("acme", 1).await.unwrap());
}

#[tokio::test]
async fn test_instances_share_counters() {
    let h = harness();
    let other = QuotaManager::new(
        Arc::new(h.counters.clone()),
        Arc::new(h.repo.clone()),
        Arc::new(crate::events::NoopEventSink),
        QuotaSettings::default(),
    );

    h.manager.set_quota("acme", 1000).await.unwrap();
    h.manager.check_and_update_quota("acme", 700).await.unwrap();

    assert_eq!(other.get_quota("acme").await.unwrap(), 1000);
    assert!(!other.check_and_update_quota("acme", 400).await.unwrap());
}

#[tokio::test]
async fn test_other_kinds_count_from_zero() {
    let h = harness();
    assert_eq!(
        h.manager
            .get_usage_of("acme", QuotaKind::ApiCalls)
            .await
            .unwrap(),
        0
    );
    h.manager
        .set_quota_of("acme", QuotaKind::UserCount, 2)
        .await
        .unwrap();

    let m = &h.manager;
    assert!(m.check_and_update_of("acme", QuotaKind::UserCount, 1).await.unwrap());
    assert!(m.check_and_update_of("acme", QuotaKind::UserCount, 1).await.unwrap());
    assert!(!m.check_and_update_of("acme", QuotaKind::UserCount, 1).await.unwrap());

    let record = m.quota_record("acme", QuotaKind::UserCount).await.unwrap();
    assert_eq!(record.current_used, 2);
    assert_eq!(record.max_value, 2);
    assert_eq!(record.unit, QuotaUnit::Count);
    assert!(record.is_exceeded());

    // Storage counters are untouched.
    assert_eq!(m.get_usage("acme").await.unwrap(), 0);
}

#[tokio::test]
async fn test_delete_quota_forgets_everything() {
    let h = harness();
    h.repo.create(&record("a", "acme", 40)).await.unwrap();
    h.manager.set_quota("acme", 50).await.unwrap();
    h.manager.check_and_update_quota("acme", 5).await.unwrap();
    h.manager
        .set_enabled("acme", QuotaKind::Storage, false)
        .await
        .unwrap();

    h.manager
        .delete_quota("acme", QuotaKind::Storage)
        .await
        .unwrap();

    assert!(h.counters.is_empty());
    assert_eq!(
        h.manager.get_quota("acme").await.unwrap(),
        DEFAULT_STORAGE_QUOTA
    );
    assert_eq!(h.manager.get_usage("acme").await.unwrap(), 40);
    assert!(
        h.manager
            .is_enabled("acme", QuotaKind::Storage)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_validation() {
    let h = harness();
    assert!(matches!(
        h.manager.check_and_update_quota("", 1).await,
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        h.manager.set_quota("acme", -1).await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn test_monitor_sweep_reports_and_corrects_drift() {
    let mut h = harness();
    h.repo.create(&record("a", "acme", 950)).await.unwrap();
    h.repo.create(&record("b", "globex", 850)).await.unwrap();
    h.repo.create(&record("c", "initech", 10)).await.unwrap();
    h.manager.set_quota("acme", 1000).await.unwrap();
    h.manager.set_quota("globex", 800).await.unwrap();
    h.manager.set_quota("initech", 1000).await.unwrap();

    // Drifted counter: the sweep overwrites it.
    h.manager.check_and_update_quota("initech", 500).await.unwrap();
    drain(&mut h.events);

    let report = sweep_once(&h.manager).await.unwrap();
    assert_eq!(
        report,
        MonitorReport {
            scanned: 3,
            warnings: 1,
            exceeded: 1,
            failed: 0,
            cancelled: false,
        }
    );
    assert_eq!(h.manager.get_usage("initech").await.unwrap(), 10);

    let mut names = drain(&mut h.events);
    names.sort_unstable();
    assert_eq!(names, vec!["storage_quota_exceeded", "storage_quota_warning"]);
}

#[tokio::test]
async fn test_monitor_sweep_cancelled() {
    let h = harness();
    h.repo.create(&record("a", "acme", 1)).await.unwrap();

    let (tx, rx) = watch::channel(true);
    let report = h.manager.monitor_quota(rx).await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.scanned, 0);
    drop(tx);
}

#[tokio::test]
async fn test_monitor_sweep_fails_without_repository() {
    let manager = QuotaManager::new(
        Arc::new(MemoryCounterStore::new()),
        Arc::new(BrokenRepository),
        Arc::new(crate::events::NoopEventSink),
        QuotaSettings::default(),
    );
    assert!(sweep_once(&manager).await.is_err());
}

#[tokio::test]
async fn test_monitor_task_runs_and_stops() {
    let mut h = harness();
    h.repo.create(&record("a", "acme", 900)).await.unwrap();
    h.manager.set_quota("acme", 1000).await.unwrap();

    let handle = QuotaMonitor::new(Arc::clone(&h.manager))
        .with_interval(Duration::from_secs(3600))
        .spawn();

    let event = tokio::time::timeout(Duration::from_secs(5), h.events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.name(), "storage_quota_warning");

    let sweeps = tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .unwrap();
    assert_eq!(sweeps, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_gates_keep_every_increment() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(QuotaManager::new(
        Arc::new(RedbCounterStore::open(dir.path().join("counters.redb")).unwrap()),
        Arc::new(MemoryRepository::new()),
        Arc::new(crate::events::NoopEventSink),
        QuotaSettings::default(),
    ));
    manager.set_quota("acme", 1_000_000).await.unwrap();
    manager.set_quota("tight", 1_000).await.unwrap();

    let gates: Vec<_> = (0..40)
        .map(|i| {
            let manager = Arc::clone(&manager);
            let tenant = if i % 2 == 0 { "acme" } else { "tight" };
            tokio::spawn(async move {
                let allowed = manager.check_and_update_quota(tenant, 100).await.unwrap();
                (tenant, allowed)
            })
        })
        .collect();

    let mut accepted = std::collections::HashMap::new();
    for gate in gates {
        let (tenant, allowed) = gate.await.unwrap();
        if allowed {
            *accepted.entry(tenant).or_insert(0i64) += 100;
        }
    }

    assert_eq!(accepted["acme"], 2_000);
    assert_eq!(manager.get_usage("acme").await.unwrap(), 2_000);
    // Within one process the ceiling holds exactly.
    assert_eq!(accepted["tight"], 1_000);
    assert_eq!(manager.get_usage("tight").await.unwrap(), 1_000);
}

#[tokio::test]
async fn test_refund_after_recalculation_clamps_at_zero() {
    let h = harness();
    h.repo.create(&record("a", "acme", 100)).await.unwrap();
    assert_eq!(h.manager.get_usage("acme").await.unwrap(), 100);

    // A create reserves 500 bytes but has not persisted its record yet.
    assert!(h.manager.check_and_update_quota("acme", 500).await.unwrap());
    assert_eq!(h.manager.recalculate_usage("acme").await.unwrap(), 100);

    // Its compensation refunds more than the counter still holds.
    assert!(h.manager.check_and_update_quota("acme", -500).await.unwrap());
    assert_eq!(h.manager.get_usage("acme").await.unwrap(), 0);

    assert_eq!(h.manager.recalculate_usage("acme").await.unwrap(), 100);
}
