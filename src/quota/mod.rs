//! Per-tenant quota accounting.
//!
//! [`QuotaManager`] gates size-increasing writes against a configurable
//! ceiling and emits warning/exceeded events; [`QuotaMonitor`] periodically
//! recomputes usage from the metadata repository to correct drift.

mod manager;
mod monitor;
pub mod types;

#[cfg(test)]
mod tests;

pub use manager::{MonitorReport, QuotaManager};
pub use monitor::{MonitorHandle, QuotaMonitor, sweep_once};
pub use types::{
    DEFAULT_MONITOR_INTERVAL, DEFAULT_STORAGE_QUOTA, DEFAULT_WARNING_THRESHOLD, QuotaDefaults,
    QuotaKind, QuotaRecord, QuotaSettings, QuotaUnit,
};
