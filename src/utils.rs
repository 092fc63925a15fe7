//! Byte-size parsing and human-readable formatting.
//!
//! Sizes are plain `u64`/`i64` byte counts everywhere inside the crate; these
//! helpers are only used at the configuration-entry and display boundaries.

use std::time::Duration;

const KB: u64 = 1024;
const MB: u64 = 1024 * 1024;
const GB: u64 = 1024 * 1024 * 1024;
const TB: u64 = 1024 * 1024 * 1024 * 1024;

/// Parse a unit-tagged size such as `"10GB"`, `"512 mb"` or `"1000"`.
///
/// Units are binary multiples and case-insensitive. A bare number is bytes.
///
/// # Examples
///
/// ```
/// use filequota::utils::parse_size;
///
/// assert_eq!(parse_size("1000").unwrap(), 1000);
/// assert_eq!(parse_size("2KB").unwrap(), 2048);
/// assert_eq!(parse_size("10 GB").unwrap(), 10 * 1024 * 1024 * 1024);
/// ```
///
/// # Errors
///
/// Returns an error message if the number or unit is malformed, or the
/// result overflows `u64`.
pub fn parse_size(input: &str) -> Result<u64, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("size cannot be empty".to_string());
    }

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid size '{input}': expected a leading number"))?;

    let multiplier = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" => KB,
        "M" | "MB" => MB,
        "G" | "GB" => GB,
        "T" | "TB" => TB,
        other => return Err(format!("invalid size unit '{other}' in '{input}'")),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{input}' overflows"))
}

/// Format bytes in human-readable form.
///
/// # Examples
///
/// ```
/// use filequota::utils::format_bytes;
///
/// assert_eq!(format_bytes(0), "0 bytes");
/// assert_eq!(format_bytes(1024), "1.0 KB");
/// assert_eq!(format_bytes(1536), "1.5 KB");
/// assert_eq!(format_bytes(1048576), "1.0 MB");
/// ```
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        "0 bytes".to_string()
    } else if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} bytes")
    }
}

/// Format a duration in human-readable form.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use filequota::utils::format_duration;
///
/// assert_eq!(format_duration(Duration::from_secs(30)), "30s");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// assert_eq!(format_duration(Duration::from_secs(86400)), "1d 0h");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}
