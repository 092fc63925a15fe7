//! Configuration for the filequota engine.
//!
//! Settings are loaded from a TOML file (default `filequota.toml`). Every
//! field has a default, so an empty file is a valid configuration:
//!
//! - [`QuotaConfig`] - ceilings, warning threshold, enforcement, sweep interval
//! - [`ThumbnailConfig`] - derivative generation
//! - [`StorageConfig`] - byte store location and descriptors
//! - [`PublicUrlConfig`] - public link base and signing secret
//! - [`LoggingConfig`] / [`MetricsConfig`] - ambient observability
//!
//! Unit-tagged sizes (`"10GB"`) are converted to bytes here and nowhere else.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::file::{FileSettings, StorageLocation, ThumbnailSettings};
use crate::quota::{QuotaDefaults, QuotaSettings};
use crate::utils::parse_size;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "filequota.toml";

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Non-fatal warnings that should be logged but don't prevent operation.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if there are any warnings.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub thumbnail: ThumbnailConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub public_url: PublicUrlConfig,
    #[serde(default)]
    pub operations: OperationsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Quota enforcement settings.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    /// Reject writes that would exceed the ceiling.
    #[serde(default = "default_true")]
    pub enforcement: bool,
    /// Fraction of the ceiling that triggers a warning event (0.0-1.0).
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: f64,
    /// Seconds between monitoring sweeps.
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,
    /// Default storage ceiling, unit-tagged (e.g. "10GB").
    #[serde(default = "default_storage_quota")]
    pub default_storage: String,
    #[serde(default = "default_user_count")]
    pub default_user_count: i64,
    #[serde(default = "default_api_calls")]
    pub default_api_calls: i64,
    #[serde(default = "default_project_count")]
    pub default_project_count: i64,
    #[serde(default)]
    pub default_custom: i64,
}

fn default_true() -> bool {
    true
}

fn default_warning_threshold() -> f64 {
    crate::quota::DEFAULT_WARNING_THRESHOLD
}

fn default_monitor_interval() -> u64 {
    crate::quota::DEFAULT_MONITOR_INTERVAL.as_secs()
}

fn default_storage_quota() -> String {
    "10GB".to_string()
}

fn default_user_count() -> i64 {
    QuotaDefaults::default().user_count
}

fn default_api_calls() -> i64 {
    QuotaDefaults::default().api_calls
}

fn default_project_count() -> i64 {
    QuotaDefaults::default().project_count
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enforcement: default_true(),
            warning_threshold: default_warning_threshold(),
            monitor_interval_secs: default_monitor_interval(),
            default_storage: default_storage_quota(),
            default_user_count: default_user_count(),
            default_api_calls: default_api_calls(),
            default_project_count: default_project_count(),
            default_custom: 0,
        }
    }
}

/// Thumbnail generation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ThumbnailConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_thumbnail_dim")]
    pub max_width: u32,
    #[serde(default = "default_thumbnail_dim")]
    pub max_height: u32,
}

fn default_thumbnail_dim() -> u32 {
    300
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_width: default_thumbnail_dim(),
            max_height: default_thumbnail_dim(),
        }
    }
}

/// Byte store location and the descriptors recorded on every file.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root for local data (objects, counter store, metadata database).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default)]
    pub endpoint: String,
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("filequota"))
        .unwrap_or_else(|| PathBuf::from("data"))
}

fn default_provider() -> String {
    "local".to_string()
}

fn default_bucket() -> String {
    "default".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            provider: default_provider(),
            bucket: default_bucket(),
            endpoint: String::new(),
        }
    }
}

impl StorageConfig {
    /// Directory holding raw object bytes.
    pub fn objects_dir(&self) -> PathBuf {
        self.data_dir.join("objects")
    }

    /// Path of the persistent counter store.
    pub fn counters_path(&self) -> PathBuf {
        self.data_dir.join("counters.redb")
    }

    /// Path of the metadata database.
    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join("metadata.db")
    }
}

/// Public link settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PublicUrlConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Secret for signing URL tokens. Empty means tokens are unsigned.
    #[serde(default)]
    pub signing_secret: String,
    #[serde(default = "default_expiration_hours")]
    pub default_expiration_hours: i64,
}

fn default_base_url() -> String {
    "http://localhost:8080/public".to_string()
}

fn default_expiration_hours() -> i64 {
    24
}

impl Default for PublicUrlConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            signing_secret: String::new(),
            default_expiration_hours: default_expiration_hours(),
        }
    }
}

/// Per-request deadlines.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationsConfig {
    /// Deadline for a single byte-store or repository call.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: "text" or "json".
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Prometheus exporter configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    /// Listen address such as "127.0.0.1:9000". Empty disables the exporter.
    #[serde(default)]
    pub listen: String,
}

impl Config {
    /// Load configuration from `filequota.toml` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or contains invalid TOML.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read (IO error)
    /// - The file contains invalid TOML syntax
    /// - Fields have invalid types
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate configuration with comprehensive checks.
    ///
    /// Returns a `ValidationResult` containing any non-fatal warnings.
    ///
    /// # Errors
    ///
    /// Returns an error listing every fatal problem found.
    pub fn validate(&self) -> Result<ValidationResult> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // 1. Quota
        let threshold = self.quota.warning_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            errors.push(format!(
                "quota.warning_threshold must be between 0.0 and 1.0 (got: {threshold})"
            ));
        } else if threshold == 0.0 {
            warnings.push(
                "quota.warning_threshold is 0.0: every accepted write will emit a warning event"
                    .to_string(),
            );
        }

        if self.quota.monitor_interval_secs == 0 {
            errors.push("quota.monitor_interval_secs cannot be 0".to_string());
        } else if self.quota.monitor_interval_secs < 60 {
            warnings.push(format!(
                "quota.monitor_interval_secs is {}s\n  \
                 Recommendation: sweeps recompute every tenant, run them hourly or daily",
                self.quota.monitor_interval_secs
            ));
        }

        if let Err(e) = parse_size(&self.quota.default_storage) {
            errors.push(format!("quota.default_storage: {e}"));
        }

        for (name, value) in [
            ("default_user_count", self.quota.default_user_count),
            ("default_api_calls", self.quota.default_api_calls),
            ("default_project_count", self.quota.default_project_count),
            ("default_custom", self.quota.default_custom),
        ] {
            if value < 0 {
                errors.push(format!("quota.{name} cannot be negative (got: {value})"));
            }
        }

        if !self.quota.enforcement {
            warnings.push(
                "quota.enforcement is disabled: uploads are tracked but never rejected".to_string(),
            );
        }

        // 2. Thumbnails
        if self.thumbnail.enabled
            && (self.thumbnail.max_width == 0 || self.thumbnail.max_height == 0)
        {
            errors.push(
                "thumbnail.max_width and thumbnail.max_height must be positive when enabled"
                    .to_string(),
            );
        }

        // 3. Public URLs
        if self.public_url.signing_secret.is_empty() {
            warnings.push(
                "public_url.signing_secret is empty: public tokens are unsigned and \
                 every access falls back to a metadata lookup"
                    .to_string(),
            );
        }
        if self.public_url.default_expiration_hours <= 0 {
            errors.push("public_url.default_expiration_hours must be positive".to_string());
        }

        // 4. Operations
        if self.operations.timeout_secs == 0 {
            errors.push("operations.timeout_secs cannot be 0".to_string());
        }

        // 5. Logging
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            errors.push(format!(
                "logging.format must be \"text\" or \"json\" (got: \"{}\")",
                self.logging.format
            ));
        }

        if !errors.is_empty() {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }

        Ok(ValidationResult { warnings })
    }

    /// Quota manager settings with sizes converted to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `quota.default_storage` cannot be parsed.
    pub fn quota_settings(&self) -> Result<QuotaSettings> {
        let storage = parse_size(&self.quota.default_storage)
            .map_err(anyhow::Error::msg)
            .context("Invalid quota.default_storage")?;

        Ok(QuotaSettings {
            enforcement: self.quota.enforcement,
            warning_threshold: self.quota.warning_threshold,
            monitor_interval: Duration::from_secs(self.quota.monitor_interval_secs),
            defaults: QuotaDefaults {
                storage: i64::try_from(storage).unwrap_or(i64::MAX),
                user_count: self.quota.default_user_count,
                api_calls: self.quota.default_api_calls,
                project_count: self.quota.default_project_count,
                custom: self.quota.default_custom,
            },
        })
    }

    /// File manager settings.
    pub fn file_settings(&self) -> FileSettings {
        FileSettings {
            thumbnail: ThumbnailSettings {
                enabled: self.thumbnail.enabled,
                max_width: self.thumbnail.max_width,
                max_height: self.thumbnail.max_height,
            },
            location: StorageLocation {
                provider: self.storage.provider.clone(),
                bucket: self.storage.bucket.clone(),
                endpoint: self.storage.endpoint.clone(),
            },
            public_base_url: self.public_url.base_url.clone(),
            signing_secret: (!self.public_url.signing_secret.is_empty())
                .then(|| self.public_url.signing_secret.clone()),
            default_expiration_hours: self.public_url.default_expiration_hours,
            operation_timeout: Duration::from_secs(self.operations.timeout_secs),
        }
    }
}
