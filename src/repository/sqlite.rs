//! SQLite-backed metadata repository.
//!
//! The attribute bag is stored as opaque JSON text in a single column so the
//! table never needs a migration when extended properties change.

use super::backend::MetadataRepository;
use crate::file::{AttributeBag, FileRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS files (
    id               TEXT PRIMARY KEY,
    name             TEXT NOT NULL,
    path             TEXT NOT NULL,
    type             TEXT NOT NULL,
    size             INTEGER NOT NULL,
    storage_provider TEXT NOT NULL,
    bucket           TEXT NOT NULL,
    endpoint         TEXT NOT NULL,
    object_id        TEXT NOT NULL,
    tenant_id        TEXT NOT NULL,
    attributes       TEXT NOT NULL DEFAULT '{}',
    created_by       TEXT NOT NULL,
    created_at       TEXT NOT NULL,
    updated_by       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_files_tenant ON files (tenant_id);
";

const COLUMNS: &str = "id, name, path, type, size, storage_provider, bucket, endpoint, \
                       object_id, tenant_id, attributes, created_by, created_at, updated_by, updated_at";

/// Columns of one row before text fields are decoded.
struct RawRow {
    id: String,
    name: String,
    path: String,
    content_type: String,
    size: i64,
    storage_provider: String,
    bucket: String,
    endpoint: String,
    object_id: String,
    tenant_id: String,
    attributes: String,
    created_by: String,
    created_at: String,
    updated_by: String,
    updated_at: String,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            path: row.get(2)?,
            content_type: row.get(3)?,
            size: row.get(4)?,
            storage_provider: row.get(5)?,
            bucket: row.get(6)?,
            endpoint: row.get(7)?,
            object_id: row.get(8)?,
            tenant_id: row.get(9)?,
            attributes: row.get(10)?,
            created_by: row.get(11)?,
            created_at: row.get(12)?,
            updated_by: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn into_record(self) -> Result<FileRecord> {
        let attributes: AttributeBag = serde_json::from_str(&self.attributes)
            .with_context(|| format!("Corrupt attributes for file '{}'", self.id))?;

        Ok(FileRecord {
            created_at: parse_timestamp(&self.created_at, &self.id)?,
            updated_at: parse_timestamp(&self.updated_at, &self.id)?,
            id: self.id,
            name: self.name,
            path: self.path,
            content_type: self.content_type,
            size: self.size,
            storage_provider: self.storage_provider,
            bucket: self.bucket,
            endpoint: self.endpoint,
            object_id: self.object_id,
            tenant_id: self.tenant_id,
            attributes,
            created_by: self.created_by,
            updated_by: self.updated_by,
        })
    }
}

fn parse_timestamp(value: &str, id: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Corrupt timestamp '{value}' for file '{id}'"))?
        .with_timezone(&Utc))
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite-backed repository.
///
/// # Thread Safety
///
/// The connection sits behind a mutex; every call runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Opens or creates a database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created, the
    /// database cannot be opened, or the schema cannot be applied.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create metadata directory: {}", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open metadata database: {}", path.display()))?;
        Self::init(conn)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .context("Failed to set journal mode")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to apply metadata schema")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&conn.lock()))
            .await
            .context("Task join error")?
    }
}

fn encode_attributes(record: &FileRecord) -> Result<String> {
    serde_json::to_string(&record.attributes).context("Failed to encode attributes")
}

#[async_trait]
impl MetadataRepository for SqliteRepository {
    async fn create(&self, record: &FileRecord) -> Result<()> {
        let record = record.clone();
        self.run(move |conn| {
            let attributes = encode_attributes(&record)?;
            let sql = format!(
                "INSERT INTO files ({COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            );
            conn.execute(
                &sql,
                params![
                    record.id,
                    record.name,
                    record.path,
                    record.content_type,
                    record.size,
                    record.storage_provider,
                    record.bucket,
                    record.endpoint,
                    record.object_id,
                    record.tenant_id,
                    attributes,
                    record.created_by,
                    format_timestamp(&record.created_at),
                    record.updated_by,
                    format_timestamp(&record.updated_at),
                ],
            )
            .with_context(|| format!("Failed to insert file record '{}'", record.id))?;
            Ok(())
        })
        .await
    }

    async fn update(&self, record: &FileRecord) -> Result<bool> {
        let record = record.clone();
        self.run(move |conn| {
            let attributes = encode_attributes(&record)?;
            let changed = conn
                .execute(
                    "UPDATE files SET name = ?2, path = ?3, type = ?4, size = ?5, \
                     storage_provider = ?6, bucket = ?7, endpoint = ?8, object_id = ?9, \
                     tenant_id = ?10, attributes = ?11, updated_by = ?12, updated_at = ?13 \
                     WHERE id = ?1",
                    params![
                        record.id,
                        record.name,
                        record.path,
                        record.content_type,
                        record.size,
                        record.storage_provider,
                        record.bucket,
                        record.endpoint,
                        record.object_id,
                        record.tenant_id,
                        attributes,
                        record.updated_by,
                        format_timestamp(&record.updated_at),
                    ],
                )
                .with_context(|| format!("Failed to update file record '{}'", record.id))?;
            Ok(changed > 0)
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.run(move |conn| {
            let changed = conn
                .execute("DELETE FROM files WHERE id = ?1", params![id])
                .with_context(|| format!("Failed to delete file record '{id}'"))?;
            Ok(changed > 0)
        })
        .await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<FileRecord>> {
        let id = id.to_string();
        self.run(move |conn| {
            let sql = format!("SELECT {COLUMNS} FROM files WHERE id = ?1");
            let raw = conn
                .query_row(&sql, params![id], RawRow::from_row)
                .optional()
                .with_context(|| format!("Failed to read file record '{id}'"))?;
            raw.map(RawRow::into_record).transpose()
        })
        .await
    }

    async fn sum_size_by_owner(&self, tenant_id: &str) -> Result<i64> {
        let tenant_id = tenant_id.to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(size), 0) FROM files WHERE tenant_id = ?1",
                params![tenant_id],
                |row| row.get::<_, i64>(0),
            )
            .with_context(|| format!("Failed to sum sizes for tenant '{tenant_id}'"))
        })
        .await
    }

    async fn all_owners_with_files(&self) -> Result<Vec<String>> {
        self.run(|conn| {
            let mut stmt = conn
                .prepare("SELECT DISTINCT tenant_id FROM files ORDER BY tenant_id")
                .context("Failed to prepare owners query")?;
            let owners = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .context("Failed to query owners")?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to read owners")?;
            Ok(owners)
        })
        .await
    }

    async fn list_by_owner(&self, tenant_id: &str) -> Result<Vec<FileRecord>> {
        let tenant_id = tenant_id.to_string();
        self.run(move |conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM files WHERE tenant_id = ?1 ORDER BY created_at DESC, id"
            );
            let mut stmt = conn.prepare(&sql).context("Failed to prepare list query")?;
            let rows = stmt
                .query_map(params![tenant_id], RawRow::from_row)
                .context("Failed to list file records")?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to read file records")?;

            let mut records = Vec::with_capacity(rows.len());
            for raw in rows {
                records.push(raw.into_record()?);
            }
            Ok(records)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::tests::sample_record;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_round_trip_preserves_attributes() {
        let repo = SqliteRepository::in_memory().unwrap();
        let mut record = sample_record("f1", "acme", 42);
        record
            .attributes
            .insert("tags".to_string(), json!(["x", "y"]));
        record
            .attributes
            .insert("future_key".to_string(), json!({"nested": 1}));

        repo.create(&record).await.unwrap();
        let loaded = repo.get_by_id("f1").await.unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn test_duplicate_create_fails() {
        let repo = SqliteRepository::in_memory().unwrap();
        let record = sample_record("f1", "acme", 1);
        repo.create(&record).await.unwrap();
        assert!(repo.create(&record).await.is_err());
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let repo = SqliteRepository::in_memory().unwrap();
        let mut record = sample_record("f1", "acme", 1);
        repo.create(&record).await.unwrap();

        record.size = 99;
        record.updated_by = "bob".to_string();
        assert!(repo.update(&record).await.unwrap());

        let loaded = repo.get_by_id("f1").await.unwrap().unwrap();
        assert_eq!(loaded.size, 99);
        assert_eq!(loaded.updated_by, "bob");

        assert!(repo.delete("f1").await.unwrap());
        assert!(repo.get_by_id("f1").await.unwrap().is_none());
        assert!(!repo.update(&record).await.unwrap());
    }

    #[tokio::test]
    async fn test_aggregates_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta").join("metadata.db");

        {
            let repo = SqliteRepository::open(&path).unwrap();
            repo.create(&sample_record("a", "acme", 600)).await.unwrap();
            repo.create(&sample_record("b", "acme", 250)).await.unwrap();
            repo.create(&sample_record("c", "globex", 5)).await.unwrap();
        }

        let repo = SqliteRepository::open(&path).unwrap();
        assert_eq!(repo.sum_size_by_owner("acme").await.unwrap(), 850);
        assert_eq!(repo.sum_size_by_owner("nobody").await.unwrap(), 0);
        assert_eq!(
            repo.all_owners_with_files().await.unwrap(),
            vec!["acme".to_string(), "globex".to_string()]
        );
        assert_eq!(repo.list_by_owner("acme").await.unwrap().len(), 2);
    }
}
