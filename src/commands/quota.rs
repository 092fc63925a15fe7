//! Quota inspection and administration.

use anyhow::{Context, Result};

use filequota::quota::{QuotaKind, QuotaUnit};
use filequota::utils::{format_bytes, parse_size};

use super::Engine;

/// Print usage and limit of every quota kind for a tenant.
pub async fn usage(engine: &Engine, tenant: &str) -> Result<()> {
    println!("Tenant: {tenant}");
    for kind in QuotaKind::ALL {
        let record = engine.quota.quota_record(tenant, kind).await?;
        let state = if record.enabled { "" } else { " (disabled)" };
        println!(
            "  {:<14} {:>12} / {:<12} {:>6.1}%{state}",
            kind.as_str(),
            display(record.current_used, record.unit),
            display(record.max_value, record.unit),
            record.usage_percent(),
        );
    }
    Ok(())
}

/// Set the limit of one quota kind. Storage limits accept unit-tagged sizes.
pub async fn set(engine: &Engine, tenant: &str, kind: &str, limit: &str) -> Result<()> {
    let kind: QuotaKind = kind.parse()?;
    let value = match kind.unit() {
        QuotaUnit::Count => limit
            .trim()
            .parse::<i64>()
            .with_context(|| format!("Invalid count: '{limit}'"))?,
        _ => {
            let bytes = parse_size(limit).map_err(anyhow::Error::msg)?;
            i64::try_from(bytes).context("Limit too large")?
        },
    };

    engine.quota.set_quota_of(tenant, kind, value).await?;
    println!(
        "Set {kind} quota for '{tenant}' to {}",
        display(value, kind.unit())
    );
    Ok(())
}

/// Enable or disable enforcement of one quota kind for a tenant.
pub async fn toggle(engine: &Engine, tenant: &str, kind: &str, enabled: bool) -> Result<()> {
    let kind: QuotaKind = kind.parse()?;
    engine.quota.set_enabled(tenant, kind, enabled).await?;
    let state = if enabled { "enabled" } else { "disabled" };
    println!("{kind} quota {state} for '{tenant}'");
    Ok(())
}

fn display(value: i64, unit: QuotaUnit) -> String {
    match unit {
        QuotaUnit::Count => value.to_string(),
        _ => format_bytes(u64::try_from(value).unwrap_or_default()),
    }
}
