//! Core types for quota accounting.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

/// Default storage ceiling when no explicit quota was ever set (10 GiB).
pub const DEFAULT_STORAGE_QUOTA: i64 = 10 * 1024 * 1024 * 1024;

/// Default warning threshold as a fraction of the limit.
pub const DEFAULT_WARNING_THRESHOLD: f64 = 0.8;

/// Default interval between monitoring sweeps (daily).
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// The dimension being limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    Storage,
    UserCount,
    ApiCalls,
    ProjectCount,
    Custom,
}

impl QuotaKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Storage,
        Self::UserCount,
        Self::ApiCalls,
        Self::ProjectCount,
        Self::Custom,
    ];

    /// Stable key fragment used in cache keys and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::UserCount => "user_count",
            Self::ApiCalls => "api_calls",
            Self::ProjectCount => "project_count",
            Self::Custom => "custom",
        }
    }

    /// The unit values of this kind are measured in.
    pub fn unit(self) -> QuotaUnit {
        match self {
            Self::Storage => QuotaUnit::Bytes,
            _ => QuotaUnit::Count,
        }
    }
}

impl fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuotaKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::validation(format!("unknown quota kind '{s}'")))
    }
}

/// Unit tag for quota values.
///
/// Internally every storage value is bytes; the larger units only exist at
/// configuration-entry and display boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotaUnit {
    #[serde(rename = "count")]
    Count,
    #[serde(rename = "bytes")]
    Bytes,
    MB,
    GB,
    TB,
}

impl QuotaUnit {
    fn multiplier(self) -> i64 {
        match self {
            Self::Count | Self::Bytes => 1,
            Self::MB => 1024 * 1024,
            Self::GB => 1024 * 1024 * 1024,
            Self::TB => 1024 * 1024 * 1024 * 1024,
        }
    }

    /// Convert a value in this unit to the base unit, saturating on overflow.
    pub fn to_base(self, value: i64) -> i64 {
        value.saturating_mul(self.multiplier())
    }

    /// Convert a base-unit value to this unit, rounding down.
    pub fn from_base(self, value: i64) -> i64 {
        value / self.multiplier()
    }
}

/// Per-kind defaults used when a tenant has no explicit quota.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaDefaults {
    pub storage: i64,
    pub user_count: i64,
    pub api_calls: i64,
    pub project_count: i64,
    pub custom: i64,
}

impl Default for QuotaDefaults {
    fn default() -> Self {
        Self {
            storage: DEFAULT_STORAGE_QUOTA,
            user_count: 100,
            api_calls: 100_000,
            project_count: 50,
            custom: 0,
        }
    }
}

impl QuotaDefaults {
    /// Default ceiling for a kind, in base units.
    pub fn for_kind(&self, kind: QuotaKind) -> i64 {
        match kind {
            QuotaKind::Storage => self.storage,
            QuotaKind::UserCount => self.user_count,
            QuotaKind::ApiCalls => self.api_calls,
            QuotaKind::ProjectCount => self.project_count,
            QuotaKind::Custom => self.custom,
        }
    }
}

/// Runtime settings for the quota manager.
#[derive(Debug, Clone)]
pub struct QuotaSettings {
    /// When false, checks never reject (usage is still tracked).
    pub enforcement: bool,
    /// Fraction of the limit above which a warning event is emitted.
    pub warning_threshold: f64,
    /// Interval between monitoring sweeps.
    pub monitor_interval: Duration,
    pub defaults: QuotaDefaults,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            enforcement: true,
            warning_threshold: DEFAULT_WARNING_THRESHOLD,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            defaults: QuotaDefaults::default(),
        }
    }
}

/// Snapshot of one tenant's quota for one kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaRecord {
    pub tenant_id: String,
    pub kind: QuotaKind,
    pub max_value: i64,
    pub current_used: i64,
    pub unit: QuotaUnit,
    pub enabled: bool,
}

impl QuotaRecord {
    /// Usage as a percentage of the limit (0 when the limit is 0).
    pub fn usage_percent(&self) -> f64 {
        usage_percent(self.current_used, self.max_value)
    }

    /// Remaining headroom, never negative.
    pub fn remaining(&self) -> i64 {
        (self.max_value - self.current_used).max(0)
    }

    /// `usage >= limit`; always false when disabled.
    pub fn is_exceeded(&self) -> bool {
        self.enabled && self.current_used >= self.max_value
    }
}

/// Usage as a percentage of a limit.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn usage_percent(used: i64, limit: i64) -> f64 {
    if limit <= 0 {
        0.0
    } else {
        used as f64 / limit as f64 * 100.0
    }
}
