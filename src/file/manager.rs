//! File lifecycle orchestration.
//!
//! Create reserves quota first, then writes bytes, then persists metadata.
//! From the moment quota is reserved a [`PendingCleanup`] guard is armed:
//! if any later step fails it deletes the written objects and releases the
//! reservation before the error is returned, and if the future is dropped
//! (caller cancelled or timed out) the guard's `Drop` hands the same work to
//! a detached task so cleanup is never abandoned halfway. Update arms the
//! same guard over its replacement objects.

use super::extras::{AccessLevel, ExtrasPatch, FileCategory, FileExtras, FileMetadata};
use super::record::{AccessUrls, FileRecord, StoredFile};
use super::url::{TokenClaims, TokenSigner};
use super::FileSettings;
use crate::error::{Error, Result};
use crate::events::{EventSink, FileEventPayload};
use crate::metrics;
use crate::quota::QuotaManager;
use crate::reliability::retry::{RetryConfig, retry_anyhow};
use crate::repository::MetadataRepository;
use crate::store::{BoxReader, ByteStore, normalize_path};
use crate::thumbnail::{ThumbnailGenerator, is_image, thumbnail_path};
use chrono::Utc;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Input of [`FileManager::create`].
#[derive(Debug, Clone, Default)]
pub struct NewFile {
    pub object_id: String,
    pub tenant_id: String,
    pub name: String,
    pub data: Vec<u8>,
    /// Logical key in the byte store; derived from tenant, id and name
    /// when empty.
    pub path: String,
    /// Guessed from `name` when absent.
    pub content_type: Option<String>,
    pub extras: ExtrasPatch,
    pub generate_thumbnail: bool,
    /// Acting user id.
    pub actor: String,
}

impl NewFile {
    pub fn new(
        object_id: impl Into<String>,
        tenant_id: impl Into<String>,
        name: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            object_id: object_id.into(),
            tenant_id: tenant_id.into(),
            name: name.into(),
            data: data.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    #[must_use]
    pub fn extras(mut self, extras: ExtrasPatch) -> Self {
        self.extras = extras;
        self
    }

    #[must_use]
    pub fn with_thumbnail(mut self) -> Self {
        self.generate_thumbnail = true;
        self
    }

    #[must_use]
    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }
}

/// Input of [`FileManager::update`]. Unset fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct FileUpdate {
    pub name: Option<String>,
    /// Replacement content, written over the existing object.
    pub content: Option<Vec<u8>>,
    pub content_type: Option<String>,
    pub extras: ExtrasPatch,
    pub actor: String,
}

/// A public link issued by [`FileManager::generate_public_url`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicUrl {
    pub token: String,
    pub url: String,
    /// Unix seconds.
    pub expires_at: i64,
}

/// An open file body with the record it belongs to.
pub struct FileStream {
    pub file: StoredFile,
    pub reader: BoxReader,
}

impl fmt::Debug for FileStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStream")
            .field("file", &self.file.record.id)
            .finish_non_exhaustive()
    }
}

/// Orchestrates the lifecycle of file objects.
pub struct FileManager {
    store: Arc<dyn ByteStore>,
    repository: Arc<dyn MetadataRepository>,
    quota: Arc<QuotaManager>,
    events: Arc<dyn EventSink>,
    thumbnails: Arc<dyn ThumbnailGenerator>,
    signer: TokenSigner,
    settings: FileSettings,
}

impl FileManager {
    pub fn new(
        store: Arc<dyn ByteStore>,
        repository: Arc<dyn MetadataRepository>,
        quota: Arc<QuotaManager>,
        events: Arc<dyn EventSink>,
        thumbnails: Arc<dyn ThumbnailGenerator>,
        settings: FileSettings,
    ) -> Self {
        Self {
            signer: TokenSigner::new(settings.signing_secret.as_deref()),
            store,
            repository,
            quota,
            events,
            thumbnails,
            settings,
        }
    }

    pub fn settings(&self) -> &FileSettings {
        &self.settings
    }

    pub fn quota(&self) -> &Arc<QuotaManager> {
        &self.quota
    }

    /// Uploads a new file.
    ///
    /// # Errors
    ///
    /// - `Validation` when object id, tenant id or name is empty, or the
    ///   path is not a valid relative key
    /// - `QuotaExceeded` when the tenant has no room; nothing was written
    /// - `BackendUnavailable` when the byte store or repository fails;
    ///   written bytes are removed and the quota reservation released
    pub async fn create(&self, input: NewFile) -> Result<StoredFile> {
        let id = Uuid::new_v4().to_string();
        self.create_with_id(id, input, FileExtras::default()).await
    }

    /// Fetches a file.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent; `BackendUnavailable` if the repository fails.
    pub async fn get(&self, id: &str) -> Result<StoredFile> {
        let record = self.load(id).await?;
        Ok(self.hydrate(record))
    }

    /// Files of a tenant, newest first.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty tenant; `BackendUnavailable` if the
    /// repository fails.
    pub async fn list_by_owner(&self, tenant_id: &str) -> Result<Vec<StoredFile>> {
        require("tenant id", tenant_id)?;
        let records = self
            .deadline("repository", self.repository.list_by_owner(tenant_id))
            .await?;
        Ok(records.into_iter().map(|r| self.hydrate(r)).collect())
    }

    /// Patches a file.
    ///
    /// Replacement content is gated only on its growth: a same-size or
    /// smaller replacement never hits the quota, and shrinking releases the
    /// difference. New content and its thumbnail are written beside the
    /// current objects, which are deleted only once the record points at
    /// the new ones; a failed update leaves the stored file untouched.
    ///
    /// # Errors
    ///
    /// `NotFound`, `QuotaExceeded` or `BackendUnavailable`.
    pub async fn update(&self, id: &str, changes: FileUpdate) -> Result<StoredFile> {
        let mut record = self.load(id).await?;
        let mut extras = record.extras();
        let tenant = record.tenant_id.clone();

        if let Some(name) = &changes.name {
            require("name", name)?;
            record.name.clone_from(name);
        }

        let mut shrink = 0;
        let mut staged = None;
        let mut retired = Vec::new();
        if let Some(content) = &changes.content {
            let new_size = byte_len(content);
            let delta = new_size - record.size;

            let mut growth = 0;
            if delta > 0 {
                self.reserve(&tenant, delta).await?;
                growth = delta;
            } else {
                shrink = -delta;
            }

            let mut cleanup = PendingCleanup::new(
                Arc::clone(&self.store),
                Arc::clone(&self.quota),
                &tenant,
                growth,
            );
            let path = revision_path(&record.path);
            cleanup.track(path.clone());

            match self
                .deadline("byte_store", self.store.put_bytes(&path, content))
                .await
            {
                Ok(written) if byte_len_u64(written) == new_size => {},
                Ok(written) => {
                    cleanup.run().await;
                    return Err(Error::backend(
                        "byte_store",
                        format!("short write for '{path}': {written} of {new_size} bytes"),
                    ));
                },
                Err(e) => {
                    cleanup.run().await;
                    return Err(e);
                },
            }

            retired.push(std::mem::replace(&mut record.path, path));
            record.size = new_size;
            record.content_type = changes
                .content_type
                .clone()
                .unwrap_or_else(|| guess_content_type(&record.name));
            refresh_category(&mut extras, &record.content_type);

            retired.extend(extras.thumbnail_path.take());
            extras.thumbnail_path = self.make_thumbnail(&record, content).await;
            if let Some(thumb) = &extras.thumbnail_path {
                cleanup.track(thumb.clone());
            }
            staged = Some(cleanup);
        } else if let Some(content_type) = &changes.content_type {
            record.content_type.clone_from(content_type);
            refresh_category(&mut extras, content_type);
        }

        extras.merge(&changes.extras);
        record.set_extras(&extras);
        record.updated_by.clone_from(&changes.actor);
        record.updated_at = Utc::now();

        let persisted = match self
            .deadline("repository", self.repository.update(&record))
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::not_found("file", id)),
            Err(e) => Err(e),
        };
        if let Err(e) = persisted {
            if let Some(cleanup) = staged {
                cleanup.run().await;
            }
            return Err(e);
        }

        if let Some(mut cleanup) = staged {
            cleanup.disarm();
        }
        for path in &retired {
            self.delete_object(path).await;
        }
        self.release(&tenant, shrink).await;

        debug!(file_id = %id, tenant = %tenant, "File updated");
        metrics::record_file_operation("update");
        self.publish(&record, &changes.actor, EventKind::Updated);
        Ok(self.hydrate(record))
    }

    /// Deletes a file, its thumbnail and its metadata, and releases its
    /// quota.
    ///
    /// Byte store failures are logged and do not block the delete.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent; `BackendUnavailable` if the repository fails.
    pub async fn delete(&self, id: &str, actor: &str) -> Result<StoredFile> {
        let record = self.load(id).await?;
        let extras = record.extras();

        self.delete_object(&record.path).await;
        if let Some(thumb) = &extras.thumbnail_path {
            self.delete_object(thumb).await;
        }

        if !self
            .deadline("repository", self.repository.delete(id))
            .await?
        {
            return Err(Error::not_found("file", id));
        }

        self.release(&record.tenant_id, record.size).await;

        info!(file_id = %id, tenant = %record.tenant_id, size = record.size, "File deleted");
        metrics::record_file_operation("delete");
        self.publish(&record, actor, EventKind::Deleted);
        Ok(self.hydrate(record))
    }

    /// Stores new content as the next version of `id`.
    ///
    /// The new record inherits the current extended properties, and its
    /// version list is the current one plus `id`. The current record is left
    /// intact.
    ///
    /// # Errors
    ///
    /// As [`create`](Self::create), plus `NotFound` if `id` is absent.
    pub async fn create_version(
        &self,
        id: &str,
        data: Vec<u8>,
        name: &str,
        actor: &str,
    ) -> Result<StoredFile> {
        let current = self.load(id).await?;
        let mut extras = current.extras();
        extras.versions.push(current.id.clone());
        extras.thumbnail_path = None;

        let new_id = Uuid::new_v4().to_string();
        let input = NewFile {
            object_id: current.object_id.clone(),
            tenant_id: current.tenant_id.clone(),
            path: format!("versions/{new_id}/{name}"),
            name: name.to_string(),
            data,
            content_type: None,
            extras: ExtrasPatch::default(),
            generate_thumbnail: true,
            actor: actor.to_string(),
        };

        let head = self.create_with_id(new_id, input, extras).await?;
        info!(file_id = %head.record.id, previous = %id, versions = head.extras.versions.len(), "File version created");
        Ok(head)
    }

    /// The ancestors of `id` in stored order, followed by `id` itself.
    ///
    /// Ancestors that cannot be loaded are skipped.
    ///
    /// # Errors
    ///
    /// `NotFound` if `id` is absent; `BackendUnavailable` if loading it
    /// fails.
    pub async fn get_versions(&self, id: &str) -> Result<Vec<StoredFile>> {
        let head = self.get(id).await?;
        let mut chain = Vec::with_capacity(head.extras.versions.len() + 1);

        for version_id in &head.extras.versions {
            match self.load(version_id).await {
                Ok(record) => chain.push(self.hydrate(record)),
                Err(e) => {
                    warn!(file_id = %id, version = %version_id, error = %e, "Skipping unreadable version");
                },
            }
        }

        chain.push(head);
        Ok(chain)
    }

    /// Sets `access_level` (and `is_public` with it).
    ///
    /// # Errors
    ///
    /// `Validation` unless `level` is `public`, `private` or `shared`;
    /// `NotFound`; `BackendUnavailable`.
    pub async fn set_access_level(&self, id: &str, level: &str, actor: &str) -> Result<StoredFile> {
        let level: AccessLevel = level.parse()?;
        let mut record = self.load(id).await?;

        let mut extras = record.extras();
        extras.set_access_level(level);
        record.set_extras(&extras);

        self.persist(record, actor).await
    }

    /// Publishes a file for `expiration_hours` (default when not positive).
    ///
    /// # Errors
    ///
    /// `NotFound`; `BackendUnavailable`.
    pub async fn generate_public_url(&self, id: &str, expiration_hours: i64) -> Result<PublicUrl> {
        let hours = if expiration_hours > 0 {
            expiration_hours
        } else {
            self.settings.default_expiration_hours
        };
        let expires_at = Utc::now()
            .timestamp()
            .saturating_add(hours.saturating_mul(3600));

        let mut record = self.load(id).await?;
        let mut extras = record.extras();
        extras.set_access_level(AccessLevel::Public);
        extras.expires_at = Some(expires_at);
        record.set_extras(&extras);

        let actor = record.updated_by.clone();
        let file = self.persist(record, &actor).await?;

        let token = self.signer.issue(file.id(), Some(expires_at));
        Ok(PublicUrl {
            url: self.public_link(&token),
            token,
            expires_at,
        })
    }

    /// Opens the content of a file.
    ///
    /// # Errors
    ///
    /// `Expired` once `expires_at` has passed, whatever the access level;
    /// `NotFound` if the record or its bytes are gone;
    /// `BackendUnavailable`.
    pub async fn get_file_stream(&self, id: &str) -> Result<FileStream> {
        let record = self.load(id).await?;
        self.open(record, false).await
    }

    /// Opens a file through a public token.
    ///
    /// A verified token's expiry is enforced before any lookup. The record
    /// must still be public and unexpired.
    ///
    /// # Errors
    ///
    /// `Validation` for a malformed token; `Expired`; `NotFound` when the
    /// file is missing or not public; `BackendUnavailable`.
    pub async fn open_public(&self, token: &str) -> Result<FileStream> {
        let record = self.resolve_public(token).await?;
        self.open(record, false).await
    }

    /// Opens the thumbnail of a file through a public token.
    ///
    /// # Errors
    ///
    /// As [`open_public`](Self::open_public); `NotFound` when the file has
    /// no thumbnail.
    pub async fn open_public_thumbnail(&self, token: &str) -> Result<FileStream> {
        let record = self.resolve_public(token).await?;
        self.open(record, true).await
    }

    async fn create_with_id(&self, id: String, input: NewFile, base: FileExtras) -> Result<StoredFile> {
        require("object id", &input.object_id)?;
        require("tenant id", &input.tenant_id)?;
        require("name", &input.name)?;

        let path = if input.path.is_empty() {
            format!("{}/{id}/{}", input.tenant_id, input.name)
        } else {
            input.path.clone()
        };
        let path = normalize_path(&path).map_err(|e| Error::validation(e.to_string()))?;

        let size = byte_len(&input.data);
        self.reserve(&input.tenant_id, size).await?;

        let mut cleanup = PendingCleanup::new(
            Arc::clone(&self.store),
            Arc::clone(&self.quota),
            &input.tenant_id,
            size,
        );
        cleanup.track(path.clone());

        match self
            .deadline("byte_store", self.store.put_bytes(&path, &input.data))
            .await
        {
            Ok(written) if byte_len_u64(written) == size => {},
            Ok(written) => {
                cleanup.run().await;
                return Err(Error::backend(
                    "byte_store",
                    format!("short write for '{path}': {written} of {size} bytes"),
                ));
            },
            Err(e) => {
                cleanup.run().await;
                return Err(e);
            },
        }

        let content_type = input
            .content_type
            .clone()
            .unwrap_or_else(|| guess_content_type(&input.name));

        let mut extras = base;
        extras.merge(&input.extras);
        refresh_category(&mut extras, &content_type);

        let now = Utc::now();
        let mut record = FileRecord {
            id,
            name: input.name.clone(),
            path,
            content_type,
            size,
            storage_provider: self.settings.location.provider.clone(),
            bucket: self.settings.location.bucket.clone(),
            endpoint: self.settings.location.endpoint.clone(),
            object_id: input.object_id.clone(),
            tenant_id: input.tenant_id.clone(),
            attributes: Default::default(),
            created_by: input.actor.clone(),
            created_at: now,
            updated_by: input.actor.clone(),
            updated_at: now,
        };

        if input.generate_thumbnail
            && let Some(thumb) = self.make_thumbnail(&record, &input.data).await
        {
            cleanup.track(thumb.clone());
            extras.thumbnail_path = Some(thumb);
        }
        record.set_extras(&extras);

        if let Err(e) = self
            .deadline("repository", self.repository.create(&record))
            .await
        {
            cleanup.run().await;
            return Err(e);
        }
        cleanup.disarm();

        info!(file_id = %record.id, tenant = %record.tenant_id, size, path = %record.path, "File created");
        metrics::record_file_operation("create");
        self.publish(&record, &input.actor, EventKind::Created);
        Ok(self.hydrate(record))
    }

    async fn load(&self, id: &str) -> Result<FileRecord> {
        require("file id", id)?;
        self.deadline("repository", self.repository.get_by_id(id))
            .await?
            .ok_or_else(|| Error::not_found("file", id))
    }

    async fn persist(&self, mut record: FileRecord, actor: &str) -> Result<StoredFile> {
        record.updated_by = actor.to_string();
        record.updated_at = Utc::now();

        if !self
            .deadline("repository", self.repository.update(&record))
            .await?
        {
            return Err(Error::not_found("file", record.id));
        }

        metrics::record_file_operation("update");
        self.publish(&record, actor, EventKind::Updated);
        Ok(self.hydrate(record))
    }

    async fn resolve_public(&self, token: &str) -> Result<FileRecord> {
        let claims = self.signer.parse(token)?;

        if let TokenClaims::Verified {
            file_id,
            expires_at: Some(expires_at),
        } = &claims
            && *expires_at <= Utc::now().timestamp()
        {
            return Err(Error::Expired {
                id: file_id.clone(),
                expired_at: *expires_at,
            });
        }

        let record = self.load(claims.file_id()).await?;
        if !record.extras().is_public {
            return Err(Error::not_found("public file", claims.file_id()));
        }
        Ok(record)
    }

    async fn open(&self, record: FileRecord, thumbnail: bool) -> Result<FileStream> {
        let extras = record.extras();
        if let Some(expired_at) = extras.expires_at
            && extras.is_expired_at(Utc::now().timestamp())
        {
            return Err(Error::Expired {
                id: record.id,
                expired_at,
            });
        }

        let path = if thumbnail {
            extras
                .thumbnail_path
                .clone()
                .ok_or_else(|| Error::not_found("thumbnail", record.id.clone()))?
        } else {
            record.path.clone()
        };

        let reader = self
            .deadline("byte_store", self.store.get_stream(&path))
            .await?
            .ok_or_else(|| Error::not_found("file content", path.clone()))?;

        metrics::record_file_operation("access");
        self.publish(&record, "", EventKind::Accessed);
        Ok(FileStream {
            file: self.hydrate(record),
            reader,
        })
    }

    async fn reserve(&self, tenant: &str, bytes: i64) -> Result<()> {
        if self.quota.check_and_update_quota(tenant, bytes).await? {
            return Ok(());
        }

        let used = self.quota.get_usage(tenant).await.unwrap_or_default();
        let limit = self.quota.get_quota(tenant).await.unwrap_or_default();
        Err(Error::QuotaExceeded {
            tenant: tenant.to_string(),
            requested: bytes,
            used,
            limit,
        })
    }

    async fn release(&self, tenant: &str, bytes: i64) {
        release_quota(&self.quota, tenant, bytes).await;
    }

    async fn make_thumbnail(&self, record: &FileRecord, data: &[u8]) -> Option<String> {
        let settings = &self.settings.thumbnail;
        if !settings.enabled || !is_image(&record.content_type) {
            return None;
        }

        let thumb = match self
            .deadline(
                "thumbnail",
                self.thumbnails.create_thumbnail(
                    data,
                    &record.name,
                    settings.max_width,
                    settings.max_height,
                ),
            )
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(file_id = %record.id, error = %e, "Thumbnail generation failed, continuing without");
                return None;
            },
        };

        let path = thumbnail_path(&record.path);
        match self
            .deadline("byte_store", self.store.put_bytes(&path, &thumb))
            .await
        {
            Ok(_) => Some(path),
            Err(e) => {
                warn!(file_id = %record.id, error = %e, "Failed to store thumbnail, continuing without");
                None
            },
        }
    }

    async fn delete_object(&self, path: &str) {
        let store = &self.store;
        let result = retry_anyhow(RetryConfig::cleanup(), "delete object", || async move {
            store.delete(path).await
        })
        .await;

        if let Err(e) = result {
            warn!(path = %path, error = %format!("{e:#}"), "Failed to delete object, leaving orphan");
            metrics::record_cleanup_failure();
        }
    }

    fn hydrate(&self, record: FileRecord) -> StoredFile {
        let extras = record.extras();
        let urls = extras.is_public.then(|| {
            let token = self.signer.issue(&record.id, extras.expires_at);
            let url = self.public_link(&token);
            AccessUrls {
                thumbnail_url: extras
                    .thumbnail_path
                    .as_ref()
                    .map(|_| format!("{url}/thumbnail")),
                url,
            }
        });

        StoredFile {
            record,
            extras,
            urls,
        }
    }

    fn public_link(&self, token: &str) -> String {
        format!(
            "{}/{token}",
            self.settings.public_base_url.trim_end_matches('/')
        )
    }

    fn publish(&self, record: &FileRecord, actor: &str, kind: EventKind) {
        let payload = FileEventPayload::from_record(record, actor);
        let result = match kind {
            EventKind::Created => self.events.publish_file_created(payload),
            EventKind::Updated => self.events.publish_file_updated(payload),
            EventKind::Deleted => self.events.publish_file_deleted(payload),
            EventKind::Accessed => self.events.publish_file_accessed(payload),
        };
        if let Err(e) = result {
            warn!(file_id = %record.id, event = ?kind, error = %e, "Failed to publish file event");
        }
    }

    /// Runs a backend call under the configured deadline.
    async fn deadline<T, F>(&self, backend: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let timeout = self.settings.operation_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Error::backend(backend, e)),
            Err(_) => Err(Error::backend(
                backend,
                format!("timed out after {}", crate::utils::format_duration(timeout)),
            )),
        }
    }
}

impl fmt::Debug for FileManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileManager")
            .field("settings", &self.settings)
            .field("signer", &self.signer)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
enum EventKind {
    Created,
    Updated,
    Deleted,
    Accessed,
}

/// Compensation for a create that has reserved quota and may have written
/// objects.
struct PendingCleanup {
    store: Arc<dyn ByteStore>,
    quota: Arc<QuotaManager>,
    tenant: String,
    reserved: i64,
    paths: Vec<String>,
    armed: bool,
}

impl PendingCleanup {
    fn new(store: Arc<dyn ByteStore>, quota: Arc<QuotaManager>, tenant: &str, reserved: i64) -> Self {
        Self {
            store,
            quota,
            tenant: tenant.to_string(),
            reserved,
            paths: Vec::new(),
            armed: true,
        }
    }

    fn track(&mut self, path: String) {
        self.paths.push(path);
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    /// Compensates inline.
    async fn run(mut self) {
        self.armed = false;
        compensate(
            Arc::clone(&self.store),
            Arc::clone(&self.quota),
            std::mem::take(&mut self.tenant),
            std::mem::take(&mut self.paths),
            self.reserved,
        )
        .await;
    }
}

impl Drop for PendingCleanup {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let work = compensate(
            Arc::clone(&self.store),
            Arc::clone(&self.quota),
            std::mem::take(&mut self.tenant),
            std::mem::take(&mut self.paths),
            self.reserved,
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Create cancelled, compensating in background");
                handle.spawn(work);
            },
            Err(_) => {
                warn!("Create cancelled outside a runtime, written objects may be orphaned");
                metrics::record_cleanup_failure();
            },
        }
    }
}

async fn compensate(
    store: Arc<dyn ByteStore>,
    quota: Arc<QuotaManager>,
    tenant: String,
    paths: Vec<String>,
    reserved: i64,
) {
    for path in &paths {
        let store = &store;
        let path = path.as_str();
        let result = retry_anyhow(RetryConfig::cleanup(), "delete orphaned object", || async move {
            store.delete(path).await
        })
        .await;

        if let Err(e) = result {
            warn!(path = %path, error = %format!("{e:#}"), "Compensating delete failed");
            metrics::record_cleanup_failure();
        }
    }

    release_quota(&quota, &tenant, reserved).await;
}

async fn release_quota(quota: &QuotaManager, tenant: &str, bytes: i64) {
    if bytes <= 0 {
        return;
    }
    if let Err(e) = quota.check_and_update_quota(tenant, -bytes).await {
        warn!(tenant = %tenant, bytes, error = %e, "Failed to release quota");
    }
}

fn require(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(format!("{what} is required")));
    }
    Ok(())
}

fn guess_content_type(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

fn refresh_category(extras: &mut FileExtras, content_type: &str) {
    match &mut extras.metadata {
        Some(metadata) => metadata.category = FileCategory::from_mime(content_type),
        None => extras.metadata = Some(FileMetadata::for_mime(content_type)),
    }
}

const REVISION_MARKER: &str = ".rev-";

/// Sibling of `path` for replacement content, replacing any earlier
/// revision suffix.
fn revision_path(path: &str) -> String {
    let base = match path.rsplit_once(REVISION_MARKER) {
        Some((base, rev)) if rev.len() == 32 && rev.bytes().all(|b| b.is_ascii_hexdigit()) => base,
        _ => path,
    };
    format!("{base}{REVISION_MARKER}{}", Uuid::new_v4().simple())
}

fn byte_len(data: &[u8]) -> i64 {
    i64::try_from(data.len()).unwrap_or(i64::MAX)
}

fn byte_len_u64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
