//! Counter store that is never reachable.
//!
//! Wire this in when no shared cache is configured, or in tests that exercise
//! degradation. The quota cache then runs on its process tier alone.

use super::backend::CounterStore;
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::time::Duration;

/// Counter store whose every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableCounterStore;

#[async_trait]
impl CounterStore for UnavailableCounterStore {
    async fn get(&self, key: &str) -> Result<Option<i64>> {
        bail!("shared counter store unavailable (get '{key}')")
    }

    async fn set(&self, key: &str, _value: i64, _ttl: Option<Duration>) -> Result<()> {
        bail!("shared counter store unavailable (set '{key}')")
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        bail!("shared counter store unavailable (delete '{key}')")
    }
}
