//! Two-tier cache for per-tenant quota counters.
//!
//! Reads go process tier, then shared tier; the shared answer, hit or miss,
//! is copied into the process tier. Writes go through both tiers. The third source (recomputing
//! from the metadata repository) belongs to the quota manager, which calls
//! [`QuotaCache::set`] after a miss.
//!
//! Shared-tier failures never surface: on read they count as a miss, on
//! write they are logged and the process tier is still updated.

use super::backend::CounterStore;
use crate::quota::QuotaKind;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which counter of a (tenant, kind) pair a key addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterSlot {
    Limit,
    Usage,
    Enabled,
}

impl CounterSlot {
    fn as_str(self) -> &'static str {
        match self {
            Self::Limit => "limit",
            Self::Usage => "usage",
            Self::Enabled => "enabled",
        }
    }
}

/// Key of one counter: `quota:{kind}:{slot}:{tenant}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    kind: QuotaKind,
    slot: CounterSlot,
    tenant: String,
}

impl CounterKey {
    pub fn new(kind: QuotaKind, slot: CounterSlot, tenant: impl Into<String>) -> Self {
        Self {
            kind,
            slot,
            tenant: tenant.into(),
        }
    }

    pub fn limit(kind: QuotaKind, tenant: &str) -> Self {
        Self::new(kind, CounterSlot::Limit, tenant)
    }

    pub fn usage(kind: QuotaKind, tenant: &str) -> Self {
        Self::new(kind, CounterSlot::Usage, tenant)
    }

    pub fn enabled(kind: QuotaKind, tenant: &str) -> Self {
        Self::new(kind, CounterSlot::Enabled, tenant)
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "quota:{}:{}:{}",
            self.kind.as_str(),
            self.slot.as_str(),
            self.tenant
        )
    }
}

/// Process-local map in front of a shared [`CounterStore`].
///
/// A `None` entry records that the shared tier had no value.
pub struct QuotaCache {
    local: Mutex<HashMap<String, Option<i64>>>,
    shared: Arc<dyn CounterStore>,
}

impl QuotaCache {
    pub fn new(shared: Arc<dyn CounterStore>) -> Self {
        Self {
            local: Mutex::new(HashMap::new()),
            shared,
        }
    }

    /// Looks up a counter in the process tier, then the shared tier.
    pub async fn get(&self, key: &CounterKey) -> Option<i64> {
        let key = key.to_string();

        if let Some(entry) = self.local.lock().get(&key).copied() {
            return entry;
        }

        match self.shared.get(&key).await {
            Ok(value) => {
                self.local.lock().insert(key, value);
                value
            },
            Err(e) => {
                debug!(key = %key, error = %format!("{e:#}"), "Shared counter read failed, treating as miss");
                None
            },
        }
    }

    /// Writes a counter through both tiers. Never expires.
    pub async fn set(&self, key: &CounterKey, value: i64) {
        let key = key.to_string();

        self.local.lock().insert(key.clone(), Some(value));

        if let Err(e) = self.shared.set(&key, value, None).await {
            warn!(key = %key, error = %format!("{e:#}"), "Shared counter write failed, process cache updated only");
        }
    }

    /// Removes a counter from both tiers.
    pub async fn remove(&self, key: &CounterKey) {
        let key = key.to_string();

        self.local.lock().remove(&key);

        if let Err(e) = self.shared.delete(&key).await {
            warn!(key = %key, error = %format!("{e:#}"), "Shared counter delete failed");
        }
    }

    /// Drops the process tier so the next read consults the shared store.
    pub fn clear_local(&self) {
        self.local.lock().clear();
    }
}

impl fmt::Debug for QuotaCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaCache")
            .field("local_entries", &self.local.lock().len())
            .finish_non_exhaustive()
    }
}
