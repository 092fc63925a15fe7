//! Retry utilities with exponential backoff.
//!
//! Used for best-effort cleanup (compensating deletes, thumbnail removal),
//! where a transient byte-store hiccup should not leave an orphaned object.
//!
//! # Example
//!
//! ```rust,ignore
//! use filequota::reliability::retry::{retry_anyhow, RetryConfig};
//!
//! let deleted = retry_anyhow(
//!     RetryConfig::cleanup(),
//!     "delete orphaned object",
//!     || async { store.delete(path).await },
//! ).await;
//! ```

use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Initial delay before first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each retry).
    pub factor: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Config for cleanup after a failed write: a few quick attempts.
    #[must_use]
    pub fn cleanup() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            factor: 2.0,
        }
    }

    /// Set maximum number of retries.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set initial delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Build the exponential backoff strategy.
    fn build_backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries as usize)
            .with_factor(self.factor)
            .with_jitter()
    }
}

/// Retry an async operation that returns anyhow::Result.
///
/// Retries only errors classified by [`is_transient_error`].
pub async fn retry_anyhow<F, Fut, T>(
    config: RetryConfig,
    operation_name: &str,
    operation: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let name = operation_name.to_string();
    let backoff = config.build_backoff();
    let max_retries = config.max_retries;

    let mut attempt = 0u32;
    let notify = |err: &anyhow::Error, dur: Duration| {
        attempt += 1;
        warn!(
            operation = %name,
            attempt = attempt,
            max_retries = max_retries,
            next_delay_ms = dur.as_millis() as u64,
            error = %err,
            "Operation failed, will retry"
        );
    };

    operation
        .retry(backoff)
        .when(is_transient_error)
        .notify(notify)
        .await
}

/// Determine if a backend error is transient and worth retrying.
///
/// Returns `true` for:
/// - Timeouts
/// - Connection refused/reset
/// - Temporary I/O errors
/// - Database lock contention
pub fn is_transient_error(error: &anyhow::Error) -> bool {
    let msg = format!("{error:#}").to_lowercase();

    if msg.contains("timed out") || msg.contains("timeout") || msg.contains("deadline") {
        debug!("Transient error detected: timeout");
        return true;
    }

    if msg.contains("connection refused")
        || msg.contains("connection reset")
        || msg.contains("broken pipe")
    {
        debug!("Transient error detected: connection issue");
        return true;
    }

    if msg.contains("resource temporarily unavailable")
        || msg.contains("try again")
        || msg.contains("interrupted")
        || msg.contains("would block")
    {
        debug!("Transient error detected: temporary I/O issue");
        return true;
    }

    if msg.contains("database is locked") || msg.contains("busy") {
        debug!("Transient error detected: database contention");
        return true;
    }

    false
}
