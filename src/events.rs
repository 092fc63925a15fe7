//! Lifecycle notifications for files and quotas.
//!
//! Publishing is fire-and-forget: managers log a failed publish at `warn`
//! and carry on, so nothing in the lifecycle depends on a sink being
//! reachable.

use crate::file::FileRecord;
use crate::quota::QuotaKind;
use crate::quota::types::usage_percent;
use anyhow::Result;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

/// Capacity of the broadcast channel; slow subscribers lag past this.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Payload of file lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEventPayload {
    pub file_id: String,
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub size: i64,
    pub storage_provider: String,
    pub bucket: String,
    pub endpoint: String,
    pub object_id: String,
    pub tenant_id: String,
    /// Acting user id.
    pub actor: String,
}

impl FileEventPayload {
    pub fn from_record(record: &FileRecord, actor: &str) -> Self {
        Self {
            file_id: record.id.clone(),
            name: record.name.clone(),
            path: record.path.clone(),
            content_type: record.content_type.clone(),
            size: record.size,
            storage_provider: record.storage_provider.clone(),
            bucket: record.bucket.clone(),
            endpoint: record.endpoint.clone(),
            object_id: record.object_id.clone(),
            tenant_id: record.tenant_id.clone(),
            actor: actor.to_string(),
        }
    }
}

/// Payload of quota events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaEventPayload {
    pub tenant_id: String,
    pub kind: QuotaKind,
    pub usage: i64,
    pub limit: i64,
    pub percentage: f64,
}

impl QuotaEventPayload {
    pub fn new(tenant_id: &str, kind: QuotaKind, usage: i64, limit: i64) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            kind,
            usage,
            limit,
            percentage: usage_percent(usage, limit),
        }
    }
}

/// Every notification the managers emit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum LifecycleEvent {
    FileCreated(FileEventPayload),
    FileUpdated(FileEventPayload),
    FileDeleted(FileEventPayload),
    FileAccessed(FileEventPayload),
    StorageQuotaWarning(QuotaEventPayload),
    StorageQuotaExceeded(QuotaEventPayload),
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FileCreated(_) => "file_created",
            Self::FileUpdated(_) => "file_updated",
            Self::FileDeleted(_) => "file_deleted",
            Self::FileAccessed(_) => "file_accessed",
            Self::StorageQuotaWarning(_) => "storage_quota_warning",
            Self::StorageQuotaExceeded(_) => "storage_quota_exceeded",
        }
    }

    /// Tenant the event concerns.
    pub fn tenant_id(&self) -> &str {
        match self {
            Self::FileCreated(p)
            | Self::FileUpdated(p)
            | Self::FileDeleted(p)
            | Self::FileAccessed(p) => &p.tenant_id,
            Self::StorageQuotaWarning(p) | Self::StorageQuotaExceeded(p) => &p.tenant_id,
        }
    }
}

/// Destination for lifecycle events.
pub trait EventSink: Send + Sync + 'static {
    /// Publishes one event.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink cannot accept the event. Callers log
    /// and ignore it.
    fn publish(&self, event: LifecycleEvent) -> Result<()>;

    fn publish_file_created(&self, payload: FileEventPayload) -> Result<()> {
        self.publish(LifecycleEvent::FileCreated(payload))
    }

    fn publish_file_updated(&self, payload: FileEventPayload) -> Result<()> {
        self.publish(LifecycleEvent::FileUpdated(payload))
    }

    fn publish_file_deleted(&self, payload: FileEventPayload) -> Result<()> {
        self.publish(LifecycleEvent::FileDeleted(payload))
    }

    fn publish_file_accessed(&self, payload: FileEventPayload) -> Result<()> {
        self.publish(LifecycleEvent::FileAccessed(payload))
    }

    fn publish_storage_quota_warning(&self, payload: QuotaEventPayload) -> Result<()> {
        self.publish(LifecycleEvent::StorageQuotaWarning(payload))
    }

    fn publish_storage_quota_exceeded(&self, payload: QuotaEventPayload) -> Result<()> {
        self.publish(LifecycleEvent::StorageQuotaExceeded(payload))
    }
}

/// Fans events out to in-process subscribers over a broadcast channel.
///
/// Publishing with no subscribers succeeds and drops the event.
pub struct BroadcastEventSink {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl BroadcastEventSink {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receives every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for BroadcastEventSink {
    fn publish(&self, event: LifecycleEvent) -> Result<()> {
        // send() only fails when nobody is listening
        let _ = self.sender.send(event);
        Ok(())
    }
}

/// Writes events to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: LifecycleEvent) -> Result<()> {
        match &event {
            LifecycleEvent::StorageQuotaWarning(p) | LifecycleEvent::StorageQuotaExceeded(p) => {
                info!(
                    event = event.name(),
                    tenant = %p.tenant_id,
                    kind = %p.kind,
                    usage = p.usage,
                    limit = p.limit,
                    percentage = format_args!("{:.1}", p.percentage),
                    "Quota event"
                );
            },
            LifecycleEvent::FileCreated(p)
            | LifecycleEvent::FileUpdated(p)
            | LifecycleEvent::FileDeleted(p)
            | LifecycleEvent::FileAccessed(p) => {
                info!(
                    event = event.name(),
                    tenant = %p.tenant_id,
                    file_id = %p.file_id,
                    path = %p.path,
                    size = p.size,
                    actor = %p.actor,
                    "File event"
                );
            },
        }
        Ok(())
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn publish(&self, _event: LifecycleEvent) -> Result<()> {
        Ok(())
    }
}
