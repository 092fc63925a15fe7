//! In-memory counter store.
//!
//! Stand-in for the shared cache in tests and single-process deployments.
//! Clones share state, so two [`QuotaCache`](super::QuotaCache) instances
//! built over clones of one store behave like two service processes talking
//! to the same cache server.

use super::backend::CounterStore;
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Copy)]
struct CounterEntry {
    value: i64,
    expires_at: Option<Instant>,
}

impl CounterEntry {
    fn new(value: i64, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() >= exp)
    }
}

/// In-memory counter store using DashMap.
#[derive(Clone, Default)]
pub struct MemoryCounterStore {
    data: Arc<DashMap<String, CounterEntry>>,
}

impl MemoryCounterStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries (including expired).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let Some(entry) = self.data.get(key).map(|e| *e.value()) else {
            return Ok(None);
        };
        if entry.is_expired() {
            self.data.remove(key);
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    async fn set(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<()> {
        self.data
            .insert(key.to_string(), CounterEntry::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.data.remove(key).is_some())
    }
}
