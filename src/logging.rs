//! Logging initialisation.
//!
//! `RUST_LOG` takes precedence over the configured level so operators can
//! raise verbosity for a single module without editing the config file.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingConfig;

/// Build the env filter, falling back to the configured level.
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(normalize_level(level)))
}

/// Map config spellings onto filter directives.
fn normalize_level(level: &str) -> &'static str {
    match level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}

/// Install the global subscriber.
///
/// Uses a JSON layer when `format = "json"`, human-readable output otherwise.
/// Calling this twice is harmless: the second install is ignored.
pub fn init(config: &LoggingConfig) {
    let filter = build_filter(&config.level);

    let result = if config.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()
    };

    if let Err(e) = result {
        eprintln!("Warning: logging already initialized: {e}");
    }
}
