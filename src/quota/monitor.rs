//! Periodic quota sweep.

use super::manager::{MonitorReport, QuotaManager, wait_for_shutdown};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Runs [`QuotaManager::monitor_quota`] on a fixed interval.
///
/// The first sweep starts immediately.
pub struct QuotaMonitor {
    manager: Arc<QuotaManager>,
    interval: Duration,
}

impl QuotaMonitor {
    pub fn new(manager: Arc<QuotaManager>) -> Self {
        let interval = manager.settings().monitor_interval;
        Self { manager, interval }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawns the loop on the current runtime.
    pub fn spawn(self) -> MonitorHandle {
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(self.run(rx));
        MonitorHandle { shutdown, task }
    }

    /// Sweeps until `shutdown` turns true; returns the number of sweeps
    /// that ran to completion.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval = %crate::utils::format_duration(self.interval),
            "Quota monitor started"
        );

        let mut completed = 0u64;
        loop {
            tokio::select! {
                biased;
                () = wait_for_shutdown(&mut shutdown) => break,
                _ = ticker.tick() => {},
            }

            match self.manager.monitor_quota(shutdown.clone()).await {
                Ok(report) if report.cancelled => break,
                Ok(_) => completed += 1,
                Err(e) => error!(error = %e, "Quota sweep failed"),
            }
        }

        info!(sweeps = completed, "Quota monitor stopped");
        completed
    }
}

/// Handle to a spawned [`QuotaMonitor`].
pub struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<u64>,
}

impl MonitorHandle {
    /// Signals shutdown and waits for the loop to exit.
    ///
    /// Returns the number of completed sweeps.
    pub async fn shutdown(self) -> u64 {
        let _ = self.shutdown.send(true);
        self.task.await.unwrap_or_default()
    }
}

/// Runs a single sweep to completion.
pub async fn sweep_once(manager: &QuotaManager) -> crate::Result<MonitorReport> {
    let (_keep_open, rx) = watch::channel(false);
    manager.monitor_quota(rx).await
}
