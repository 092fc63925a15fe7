//! Quota accounting and enforcement.
//!
//! Usage counters are resolved process tier, then shared tier, then (for
//! storage) recomputed from the metadata repository. Limits resolve the same
//! way but fall back to the configured per-kind default.
//!
//! `check_and_update` is check-then-set under a per-(tenant, kind) lock, so
//! writers within one process never lose each other's increments. Managers
//! in different processes sharing a counter store are not coordinated: two
//! of them can both pass the check and jointly overshoot the limit, so the
//! limit is soft.

use super::types::{QuotaKind, QuotaRecord, QuotaSettings};
use crate::cache::{CounterKey, CounterStore, QuotaCache};
use crate::error::{Error, Result};
use crate::events::{EventSink, QuotaEventPayload};
use crate::metrics;
use crate::repository::MetadataRepository;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

/// Outcome of one monitoring sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorReport {
    /// Tenants whose usage was recomputed.
    pub scanned: usize,
    pub warnings: usize,
    pub exceeded: usize,
    /// Tenants whose recomputation failed.
    pub failed: usize,
    /// True when shutdown interrupted the sweep.
    pub cancelled: bool,
}

/// Per-tenant quota manager.
pub struct QuotaManager {
    cache: QuotaCache,
    /// Serializes read-modify-write of one usage counter.
    gates: DashMap<CounterKey, Arc<Mutex<()>>>,
    repository: Arc<dyn MetadataRepository>,
    events: Arc<dyn EventSink>,
    settings: QuotaSettings,
}

impl QuotaManager {
    pub fn new(
        counters: Arc<dyn CounterStore>,
        repository: Arc<dyn MetadataRepository>,
        events: Arc<dyn EventSink>,
        settings: QuotaSettings,
    ) -> Self {
        Self {
            cache: QuotaCache::new(counters),
            gates: DashMap::new(),
            repository,
            events,
            settings,
        }
    }

    pub fn settings(&self) -> &QuotaSettings {
        &self.settings
    }

    /// Bytes used by `tenant`.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty tenant; `BackendUnavailable` when the
    /// counters miss and the repository cannot be read. Callers gating a
    /// write should treat the latter as "allow".
    pub async fn get_usage(&self, tenant: &str) -> Result<i64> {
        self.get_usage_of(tenant, QuotaKind::Storage).await
    }

    /// Storage ceiling for `tenant`, or the default if never set.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty tenant.
    pub async fn get_quota(&self, tenant: &str) -> Result<i64> {
        self.get_quota_of(tenant, QuotaKind::Storage).await
    }

    /// Sets the storage ceiling. Existing usage is not re-validated.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty tenant or a negative limit.
    pub async fn set_quota(&self, tenant: &str, limit: i64) -> Result<()> {
        self.set_quota_of(tenant, QuotaKind::Storage, limit).await
    }

    /// Gates a storage write of `delta` bytes and commits it when allowed.
    ///
    /// Returns `Ok(false)` when the write must be aborted. Negative deltas
    /// are always accepted and usage is clamped at zero.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty tenant. Backend failures do not surface:
    /// the write is allowed and usage is left untouched.
    pub async fn check_and_update_quota(&self, tenant: &str, delta: i64) -> Result<bool> {
        self.check_and_update_of(tenant, QuotaKind::Storage, delta)
            .await
    }

    /// `usage >= limit` for storage.
    ///
    /// False when the quota is disabled or no limit was ever stored for
    /// the tenant.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty tenant; `BackendUnavailable` when usage
    /// cannot be resolved.
    pub async fn is_quota_exceeded(&self, tenant: &str) -> Result<bool> {
        self.is_quota_exceeded_of(tenant, QuotaKind::Storage).await
    }

    /// Current usage of `kind`.
    ///
    /// Only storage usage can be recomputed; for other kinds a miss is 0.
    ///
    /// # Errors
    ///
    /// See [`get_usage`](Self::get_usage).
    pub async fn get_usage_of(&self, tenant: &str, kind: QuotaKind) -> Result<i64> {
        validate_tenant(tenant)?;

        let key = CounterKey::usage(kind, tenant);
        if let Some(usage) = self.cache.get(&key).await {
            return Ok(usage);
        }

        if kind != QuotaKind::Storage {
            return Ok(0);
        }

        debug!(tenant = %tenant, "Usage not cached, recomputing from repository");
        let usage = self.sum_from_repository(tenant).await?;
        self.cache.set(&key, usage).await;
        Ok(usage)
    }

    /// Ceiling of `kind`, or the configured default.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty tenant.
    pub async fn get_quota_of(&self, tenant: &str, kind: QuotaKind) -> Result<i64> {
        validate_tenant(tenant)?;
        Ok(self
            .stored_limit(tenant, kind)
            .await
            .unwrap_or_else(|| self.settings.defaults.for_kind(kind)))
    }

    /// Writes the ceiling of `kind` through both cache tiers.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty tenant or a negative limit.
    pub async fn set_quota_of(&self, tenant: &str, kind: QuotaKind, limit: i64) -> Result<()> {
        validate_tenant(tenant)?;
        if limit < 0 {
            return Err(Error::validation(format!(
                "quota limit must be non-negative, got {limit}"
            )));
        }

        self.cache.set(&CounterKey::limit(kind, tenant), limit).await;
        info!(tenant = %tenant, kind = %kind, limit, "Quota set");
        Ok(())
    }

    /// Turns enforcement of `kind` on or off for one tenant.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty tenant.
    pub async fn set_enabled(&self, tenant: &str, kind: QuotaKind, enabled: bool) -> Result<()> {
        validate_tenant(tenant)?;
        self.cache
            .set(&CounterKey::enabled(kind, tenant), i64::from(enabled))
            .await;
        Ok(())
    }

    /// Whether `kind` is enforced for `tenant` (default on).
    ///
    /// # Errors
    ///
    /// `Validation` for an empty tenant.
    pub async fn is_enabled(&self, tenant: &str, kind: QuotaKind) -> Result<bool> {
        validate_tenant(tenant)?;
        Ok(self.enabled(tenant, kind).await)
    }

    /// Gates a change of `delta` units of `kind` and commits it when allowed.
    ///
    /// # Errors
    ///
    /// See [`check_and_update_quota`](Self::check_and_update_quota).
    pub async fn check_and_update_of(
        &self,
        tenant: &str,
        kind: QuotaKind,
        delta: i64,
    ) -> Result<bool> {
        validate_tenant(tenant)?;

        let gate = self.gate(&CounterKey::usage(kind, tenant));
        let _held = gate.lock().await;

        let usage = match self.get_usage_of(tenant, kind).await {
            Ok(usage) => usage,
            Err(e) => {
                warn!(tenant = %tenant, kind = %kind, delta, error = %e, "Usage lookup failed, allowing write");
                metrics::record_quota_check("fail_open");
                return Ok(true);
            },
        };

        let limit = self.limit_or_seed(tenant, kind).await;
        let enabled = self.enabled(tenant, kind).await;
        let new_usage = usage.saturating_add(delta).max(0);

        if self.settings.enforcement && enabled && delta > 0 && new_usage > limit {
            info!(
                tenant = %tenant,
                kind = %kind,
                usage,
                delta,
                limit,
                "Quota exceeded, rejecting write"
            );
            metrics::record_quota_check("rejected");
            self.notify_exceeded(tenant, kind, usage, limit);
            return Ok(false);
        }

        self.cache.set(&CounterKey::usage(kind, tenant), new_usage).await;
        metrics::record_quota_check("allowed");

        if enabled && delta > 0 && self.over_warning_threshold(new_usage, limit) {
            self.notify_warning(tenant, kind, new_usage, limit);
        }

        Ok(true)
    }

    /// `usage >= limit` for `kind`.
    ///
    /// # Errors
    ///
    /// See [`is_quota_exceeded`](Self::is_quota_exceeded).
    pub async fn is_quota_exceeded_of(&self, tenant: &str, kind: QuotaKind) -> Result<bool> {
        validate_tenant(tenant)?;

        if !self.enabled(tenant, kind).await {
            return Ok(false);
        }
        let Some(limit) = self.stored_limit(tenant, kind).await else {
            return Ok(false);
        };

        let usage = self.get_usage_of(tenant, kind).await?;
        Ok(usage >= limit)
    }

    /// Snapshot of limit, usage and enabled flag.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty tenant; `BackendUnavailable` when usage
    /// cannot be resolved.
    pub async fn quota_record(&self, tenant: &str, kind: QuotaKind) -> Result<QuotaRecord> {
        let max_value = self.get_quota_of(tenant, kind).await?;
        let current_used = self.get_usage_of(tenant, kind).await?;

        Ok(QuotaRecord {
            tenant_id: tenant.to_string(),
            kind,
            max_value,
            current_used,
            unit: kind.unit(),
            enabled: self.enabled(tenant, kind).await,
        })
    }

    /// Forgets the limit, enabled flag and cached usage of `kind`.
    ///
    /// The next read recomputes usage and falls back to the default limit.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty tenant.
    pub async fn delete_quota(&self, tenant: &str, kind: QuotaKind) -> Result<()> {
        validate_tenant(tenant)?;

        self.cache.remove(&CounterKey::limit(kind, tenant)).await;
        self.cache.remove(&CounterKey::enabled(kind, tenant)).await;
        self.cache.remove(&CounterKey::usage(kind, tenant)).await;

        info!(tenant = %tenant, kind = %kind, "Quota deleted");
        Ok(())
    }

    /// Recomputes storage usage from the repository and overwrites both
    /// cache tiers.
    ///
    /// The repository only knows persisted files. Bytes reserved by a create
    /// that has not yet persisted its record are dropped from the counter;
    /// if that create then fails, its refund is clamped at zero and the
    /// counter under-counts until the next recalculation.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty tenant; `BackendUnavailable` when the
    /// repository cannot be read.
    pub async fn recalculate_usage(&self, tenant: &str) -> Result<i64> {
        validate_tenant(tenant)?;

        let key = CounterKey::usage(QuotaKind::Storage, tenant);
        let gate = self.gate(&key);
        let _held = gate.lock().await;

        let usage = self.sum_from_repository(tenant).await?;
        self.cache.set(&key, usage).await;
        metrics::set_tenant_usage(tenant, usage);
        Ok(usage)
    }

    /// Sweeps every tenant with stored files.
    ///
    /// Usage is recomputed from the repository (correcting drift in the
    /// counters) and a warning or exceeded event is emitted for each tenant
    /// over a threshold. The sweep stops between tenants, or during a
    /// repository call, once `shutdown` turns true. Its only writes are the
    /// usage overwrites of [`recalculate_usage`](Self::recalculate_usage),
    /// each complete before the next tenant, so stopping early is safe.
    ///
    /// # Errors
    ///
    /// `BackendUnavailable` when the tenant list cannot be read. Failures
    /// for individual tenants are counted in the report instead.
    pub async fn monitor_quota(&self, mut shutdown: watch::Receiver<bool>) -> Result<MonitorReport> {
        let mut report = MonitorReport::default();

        let tenants = tokio::select! {
            biased;
            () = wait_for_shutdown(&mut shutdown) => {
                report.cancelled = true;
                return Ok(report);
            },
            tenants = self.repository.all_owners_with_files() => {
                tenants.map_err(|e| Error::backend("repository", e))?
            },
        };

        for tenant in tenants {
            let usage = tokio::select! {
                biased;
                () = wait_for_shutdown(&mut shutdown) => {
                    report.cancelled = true;
                    break;
                },
                usage = self.recalculate_usage(&tenant) => usage,
            };
            report.scanned += 1;

            let usage = match usage {
                Ok(usage) => usage,
                Err(e) => {
                    warn!(tenant = %tenant, error = %e, "Failed to recompute usage");
                    report.failed += 1;
                    continue;
                },
            };

            if !self.enabled(&tenant, QuotaKind::Storage).await {
                continue;
            }
            let limit = self
                .stored_limit(&tenant, QuotaKind::Storage)
                .await
                .unwrap_or(self.settings.defaults.storage);

            if limit > 0 && usage >= limit {
                self.notify_exceeded(&tenant, QuotaKind::Storage, usage, limit);
                report.exceeded += 1;
            } else if self.over_warning_threshold(usage, limit) {
                self.notify_warning(&tenant, QuotaKind::Storage, usage, limit);
                report.warnings += 1;
            }
        }

        info!(
            scanned = report.scanned,
            warnings = report.warnings,
            exceeded = report.exceeded,
            failed = report.failed,
            cancelled = report.cancelled,
            "Quota sweep finished"
        );
        Ok(report)
    }

    fn gate(&self, key: &CounterKey) -> Arc<Mutex<()>> {
        Arc::clone(self.gates.entry(key.clone()).or_default().value())
    }

    async fn sum_from_repository(&self, tenant: &str) -> Result<i64> {
        self.repository
            .sum_size_by_owner(tenant)
            .await
            .map(|sum| sum.max(0))
            .map_err(|e| Error::backend("repository", e))
    }

    async fn stored_limit(&self, tenant: &str, kind: QuotaKind) -> Option<i64> {
        self.cache.get(&CounterKey::limit(kind, tenant)).await
    }

    async fn enabled(&self, tenant: &str, kind: QuotaKind) -> bool {
        self.cache
            .get(&CounterKey::enabled(kind, tenant))
            .await
            .is_none_or(|flag| flag != 0)
    }

    /// Stored limit, or the default written through both tiers.
    async fn limit_or_seed(&self, tenant: &str, kind: QuotaKind) -> i64 {
        if let Some(limit) = self.stored_limit(tenant, kind).await {
            return limit;
        }

        let limit = self.settings.defaults.for_kind(kind);
        debug!(tenant = %tenant, kind = %kind, limit, "Seeding default quota");
        self.cache.set(&CounterKey::limit(kind, tenant), limit).await;
        limit
    }

    #[allow(clippy::cast_precision_loss)]
    fn over_warning_threshold(&self, usage: i64, limit: i64) -> bool {
        limit > 0 && usage as f64 >= self.settings.warning_threshold * limit as f64
    }

    fn notify_warning(&self, tenant: &str, kind: QuotaKind, usage: i64, limit: i64) {
        metrics::record_quota_event("warning");
        if kind != QuotaKind::Storage {
            info!(tenant = %tenant, kind = %kind, usage, limit, "Quota warning threshold reached");
            return;
        }
        let payload = QuotaEventPayload::new(tenant, kind, usage, limit);
        if let Err(e) = self.events.publish_storage_quota_warning(payload) {
            warn!(tenant = %tenant, error = %e, "Failed to publish quota warning");
        }
    }

    fn notify_exceeded(&self, tenant: &str, kind: QuotaKind, usage: i64, limit: i64) {
        metrics::record_quota_event("exceeded");
        if kind != QuotaKind::Storage {
            return;
        }
        let payload = QuotaEventPayload::new(tenant, kind, usage, limit);
        if let Err(e) = self.events.publish_storage_quota_exceeded(payload) {
            warn!(tenant = %tenant, error = %e, "Failed to publish quota exceeded");
        }
    }
}

impl fmt::Debug for QuotaManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaManager")
            .field("settings", &self.settings)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

fn validate_tenant(tenant: &str) -> Result<()> {
    if tenant.trim().is_empty() {
        return Err(Error::validation("tenant id is required"));
    }
    Ok(())
}

/// Resolves once `shutdown` is true. Never resolves if the sender is gone.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
