//! In-memory metadata repository.

use super::backend::MetadataRepository;
use crate::file::FileRecord;
use anyhow::{Result, bail};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::BTreeSet;
use std::sync::Arc;

/// In-memory repository using DashMap.
///
/// Clones share the same records.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    records: Arc<DashMap<String, FileRecord>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl MetadataRepository for MemoryRepository {
    async fn create(&self, record: &FileRecord) -> Result<()> {
        match self.records.entry(record.id.clone()) {
            Entry::Occupied(_) => bail!("File record '{}' already exists", record.id),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            },
        }
    }

    async fn update(&self, record: &FileRecord) -> Result<bool> {
        match self.records.get_mut(&record.id) {
            Some(mut existing) => {
                *existing = record.clone();
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.records.remove(id).is_some())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<FileRecord>> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    async fn sum_size_by_owner(&self, tenant_id: &str) -> Result<i64> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .map(|r| r.size)
            .sum())
    }

    async fn all_owners_with_files(&self) -> Result<Vec<String>> {
        let owners: BTreeSet<String> = self
            .records
            .iter()
            .map(|r| r.tenant_id.clone())
            .collect();
        Ok(owners.into_iter().collect())
    }

    async fn list_by_owner(&self, tenant_id: &str) -> Result<Vec<FileRecord>> {
        let mut records: Vec<FileRecord> = self
            .records
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }
}
