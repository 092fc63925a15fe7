//! Backend trait for file metadata persistence.
//!
//! The repository is a dumb persistence target: it stores [`FileRecord`]s
//! and answers the aggregate queries the quota manager needs. It never
//! interprets the attribute bag.

use crate::file::FileRecord;
use anyhow::Result;
use async_trait::async_trait;

/// Backend trait for file metadata.
///
/// All backends must be thread-safe (`Send + Sync`) for use with tokio.
///
/// # Example
///
/// ```ignore
/// use filequota::repository::{MemoryRepository, MetadataRepository};
///
/// let repo = MemoryRepository::new();
/// repo.create(&record).await?;
/// let used = repo.sum_size_by_owner("acme").await?;
/// ```
#[async_trait]
pub trait MetadataRepository: Send + Sync + 'static {
    /// Inserts a new record.
    ///
    /// # Errors
    ///
    /// Returns an error if a record with the same id exists or the write
    /// fails.
    async fn create(&self, record: &FileRecord) -> Result<()>;

    /// Replaces an existing record.
    ///
    /// # Returns
    /// * `Ok(true)` - Record existed and was replaced
    /// * `Ok(false)` - No record with that id
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn update(&self, record: &FileRecord) -> Result<bool>;

    /// Deletes a record.
    ///
    /// # Returns
    /// * `Ok(true)` - Record existed and was deleted
    /// * `Ok(false)` - No record with that id
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Fetches a record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the stored row is corrupt.
    async fn get_by_id(&self, id: &str) -> Result<Option<FileRecord>>;

    /// Sum of `size` over every record of a tenant; 0 when it has none.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn sum_size_by_owner(&self, tenant_id: &str) -> Result<i64>;

    /// Distinct tenants that own at least one record, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn all_owners_with_files(&self) -> Result<Vec<String>>;

    /// Records of a tenant, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored row is corrupt.
    async fn list_by_owner(&self, tenant_id: &str) -> Result<Vec<FileRecord>>;
}
