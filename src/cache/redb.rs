//! Redb-backed counter store.
//!
//! Persists counters on local disk with ACID guarantees. Used by the binary
//! so quota limits survive restarts of a single-node deployment.

use super::backend::CounterStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Table of counters: key -> JSON [`StoredCounter`].
pub(crate) const COUNTERS_TABLE: TableDefinition<'static, &'static str, &'static [u8]> =
    TableDefinition::new("counters");

/// On-disk representation of a counter.
///
/// The value is kept as decimal text so the database stays readable by
/// tools that do not know the integer width.
#[derive(Debug, Serialize, Deserialize)]
struct StoredCounter {
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
}

impl StoredCounter {
    fn new(value: i64, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|ttl| {
            let secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
            Utc::now().timestamp().saturating_add(secs)
        });
        Self {
            value: value.to_string(),
            expires_at,
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|exp| Utc::now().timestamp() >= exp)
    }

    fn parse(&self, key: &str) -> Result<i64> {
        self.value
            .parse()
            .with_context(|| format!("Counter '{key}' holds a non-integer value"))
    }
}

/// Redb-backed counter store.
///
/// # Thread Safety
///
/// `RedbCounterStore` is `Clone` and can be shared across threads. The
/// underlying database handles concurrent access safely.
#[derive(Clone)]
pub struct RedbCounterStore {
    db: Arc<Database>,
}

impl RedbCounterStore {
    /// Opens or creates a counter database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Parent directory cannot be created
    /// - Database file cannot be opened or created
    /// - Initialization transaction fails to begin or commit
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create counter directory: {}", parent.display())
            })?;
        }

        let db = Database::create(path)
            .with_context(|| format!("Failed to open counter database: {}", path.display()))?;

        let write_txn = db
            .begin_write()
            .context("Failed to begin initialization transaction")?;
        {
            let _table = write_txn
                .open_table(COUNTERS_TABLE)
                .context("Failed to initialize counters table")?;
        }
        write_txn
            .commit()
            .context("Failed to commit initialization transaction")?;

        Ok(Self { db: Arc::new(db) })
    }

    fn get_sync(&self, key: &str) -> Result<Option<i64>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;

        let table = read_txn
            .open_table(COUNTERS_TABLE)
            .context("Failed to open counters table")?;

        let stored = match table
            .get(key)
            .with_context(|| format!("Failed to read counter '{key}'"))?
        {
            Some(guard) => serde_json::from_slice::<StoredCounter>(guard.value())
                .with_context(|| format!("Failed to deserialize counter '{key}'"))?,
            None => return Ok(None),
        };

        if stored.is_expired() {
            drop(table);
            drop(read_txn);
            self.delete_sync(key)?;
            return Ok(None);
        }

        stored.parse(key).map(Some)
    }

    fn set_sync(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<()> {
        let json = serde_json::to_vec(&StoredCounter::new(value, ttl))
            .context("Failed to serialize counter")?;

        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        {
            let mut table = write_txn
                .open_table(COUNTERS_TABLE)
                .context("Failed to open counters table")?;

            table
                .insert(key, json.as_slice())
                .with_context(|| format!("Failed to write counter '{key}'"))?;
        }
        write_txn
            .commit()
            .context("Failed to commit set transaction")?;

        Ok(())
    }

    fn delete_sync(&self, key: &str) -> Result<bool> {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;

        let removed = {
            let mut table = write_txn
                .open_table(COUNTERS_TABLE)
                .context("Failed to open counters table")?;

            table
                .remove(key)
                .with_context(|| format!("Failed to remove counter '{key}'"))?
                .is_some()
        };

        write_txn
            .commit()
            .context("Failed to commit delete transaction")?;

        Ok(removed)
    }
}

#[async_trait]
impl CounterStore for RedbCounterStore {
    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let store = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || store.get_sync(&key))
            .await
            .context("Task join error")?
    }

    async fn set(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<()> {
        let store = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || store.set_sync(&key, value, ttl))
            .await
            .context("Task join error")?
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let store = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || store.delete_sync(&key))
            .await
            .context("Task join error")?
    }
}
