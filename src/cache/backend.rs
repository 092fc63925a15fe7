//! Backend trait for the shared counter store.
//!
//! This is the cross-process tier of the quota cache: every service instance
//! reads and writes the same counters through it, so a horizontally scaled
//! deployment shares one logical usage value per tenant.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Backend trait for integer counters addressed by key.
///
/// Values are signed 64-bit integers. Implementations that persist them as
/// text must use decimal notation so other clients can read the keys.
///
/// # Example
///
/// ```ignore
/// use filequota::cache::{CounterStore, MemoryCounterStore};
///
/// let store = MemoryCounterStore::new();
/// store.set("quota:storage:usage:acme", 600, None).await?;
/// assert_eq!(store.get("quota:storage:usage:acme").await?, Some(600));
/// ```
#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    /// Retrieves a counter.
    ///
    /// # Returns
    /// * `Ok(Some(value))` - Counter found and not expired
    /// * `Ok(None)` - Counter not found or expired
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable or the stored value is
    /// not a valid integer.
    async fn get(&self, key: &str) -> Result<Option<i64>>;

    /// Stores a counter with an optional TTL.
    ///
    /// `None` means the value persists until explicitly overwritten.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable or the write fails.
    async fn set(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<()>;

    /// Deletes a counter.
    ///
    /// # Returns
    /// * `Ok(true)` - Counter existed and was deleted
    /// * `Ok(false)` - Counter did not exist
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable or the delete fails.
    async fn delete(&self, key: &str) -> Result<bool>;
}
