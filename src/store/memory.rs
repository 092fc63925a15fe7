//! In-memory byte store.
//!
//! Provides a fast, non-persistent object store using DashMap for
//! concurrent access. Ideal for testing, development, and embedded use cases.

use super::backend::{BoxReader, ByteStore};
use super::validation::normalize_path;
use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::io::Cursor;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

/// In-memory byte store using DashMap.
///
/// All data is lost when the process exits.
///
/// # Thread Safety
///
/// `MemoryByteStore` is `Clone`; clones share the same objects.
#[derive(Clone, Default)]
pub struct MemoryByteStore {
    data: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryByteStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of objects in the store.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns all stored paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.data.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl ByteStore for MemoryByteStore {
    async fn put(&self, path: &str, mut reader: BoxReader) -> Result<u64> {
        let normalized = normalize_path(path)?;

        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .with_context(|| format!("Failed to read upload for: {normalized}"))?;

        let written = buf.len() as u64;
        self.data.insert(normalized, buf);
        Ok(written)
    }

    async fn get_stream(&self, path: &str) -> Result<Option<BoxReader>> {
        let normalized = normalize_path(path)?;
        Ok(self.data.get(&normalized).map(|entry| {
            let reader: BoxReader = Box::new(Cursor::new(entry.value().clone()));
            reader
        }))
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let normalized = normalize_path(path)?;
        Ok(self.data.remove(&normalized).is_some())
    }

    async fn size(&self, path: &str) -> Result<Option<u64>> {
        let normalized = normalize_path(path)?;
        Ok(self
            .data
            .get(&normalized)
            .map(|entry| entry.value().len() as u64))
    }
}
