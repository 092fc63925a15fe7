//! Usage reconciliation against the metadata repository.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::info;

use filequota::quota::{QuotaMonitor, sweep_once};

use super::Engine;

/// Run the periodic monitor until Ctrl+C.
pub async fn run(engine: &Engine, interval_secs: Option<u64>) -> Result<()> {
    let mut monitor = QuotaMonitor::new(engine.quota.clone());
    if let Some(secs) = interval_secs {
        anyhow::ensure!(secs > 0, "--interval must be positive");
        monitor = monitor.with_interval(Duration::from_secs(secs));
    }

    let handle = monitor.spawn();
    println!("Quota monitor running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    info!("Shutdown requested, stopping monitor");
    let sweeps = handle.shutdown().await;
    println!("Stopped after {sweeps} sweep(s)");
    Ok(())
}

/// Run one sweep and print its report.
pub async fn sweep(engine: &Engine) -> Result<()> {
    let report = sweep_once(&engine.quota).await?;
    println!("Scanned:  {}", report.scanned);
    println!("Warnings: {}", report.warnings);
    println!("Exceeded: {}", report.exceeded);
    println!("Failed:   {}", report.failed);

    if report.failed > 0 {
        anyhow::bail!("{} tenant(s) could not be recomputed", report.failed);
    }
    Ok(())
}
