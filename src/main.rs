//! filequota command-line interface.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use filequota::config::{Config, DEFAULT_CONFIG_FILE, MetricsConfig};
use filequota::logging;

use commands::Engine;

#[derive(Parser)]
#[command(name = "filequota")]
#[command(about = "Per-tenant storage quotas and file lifecycle management", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the periodic usage monitor until Ctrl+C
    Monitor {
        /// Seconds between sweeps (overrides quota.monitor_interval_secs)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Recompute every tenant's usage once
    Sweep,
    /// Show usage and limits for a tenant
    Usage {
        tenant: String,
    },
    /// Set a tenant's quota limit
    SetQuota {
        tenant: String,
        /// Limit; storage accepts sizes like 500MB or 10GB
        limit: String,
        /// Quota kind (storage, user_count, api_calls, project_count, custom)
        #[arg(long, default_value = "storage")]
        kind: String,
    },
    /// Enable enforcement of a quota kind for a tenant
    Enable {
        tenant: String,
        #[arg(long, default_value = "storage")]
        kind: String,
    },
    /// Disable enforcement of a quota kind for a tenant
    Disable {
        tenant: String,
        #[arg(long, default_value = "storage")]
        kind: String,
    },
    /// Upload a local file
    Put {
        tenant: String,
        file: PathBuf,
        /// Business object the file belongs to (defaults to the tenant)
        #[arg(long)]
        object_id: Option<String>,
        /// Virtual folder shown to users
        #[arg(long)]
        folder: Option<String>,
        /// Acting user id
        #[arg(long, default_value = "cli")]
        actor: String,
        /// Publish the file for this many hours
        #[arg(long)]
        publish: Option<i64>,
    },
    /// List a tenant's files
    Ls {
        tenant: String,
    },
    /// Delete a file
    Rm {
        id: String,
        #[arg(long, default_value = "cli")]
        actor: String,
    },
    /// Validate the configuration file
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)?;
    logging::init(&config.logging);

    if let Commands::CheckConfig = cli.command {
        return commands::check_config(&config);
    }

    config.validate()?;
    install_metrics(&config.metrics)?;
    let engine = Engine::open(&config)?;

    match cli.command {
        Commands::Monitor { interval } => commands::monitor::run(&engine, interval).await,
        Commands::Sweep => commands::monitor::sweep(&engine).await,
        Commands::Usage { tenant } => commands::quota::usage(&engine, &tenant).await,
        Commands::SetQuota {
            tenant,
            limit,
            kind,
        } => commands::quota::set(&engine, &tenant, &kind, &limit).await,
        Commands::Enable { tenant, kind } => {
            commands::quota::toggle(&engine, &tenant, &kind, true).await
        },
        Commands::Disable { tenant, kind } => {
            commands::quota::toggle(&engine, &tenant, &kind, false).await
        },
        Commands::Put {
            tenant,
            file,
            object_id,
            folder,
            actor,
            publish,
        } => {
            commands::files::put(
                &engine,
                commands::files::PutArgs {
                    tenant: &tenant,
                    file: &file,
                    object_id: object_id.as_deref(),
                    folder: folder.as_deref(),
                    actor: &actor,
                    publish_hours: publish,
                },
            )
            .await
        },
        Commands::Ls { tenant } => commands::files::list(&engine, &tenant).await,
        Commands::Rm { id, actor } => commands::files::remove(&engine, &id, &actor).await,
        Commands::CheckConfig => Ok(()),
    }
}

#[cfg(feature = "prometheus")]
fn install_metrics(config: &MetricsConfig) -> Result<()> {
    use anyhow::Context;

    if config.listen.is_empty() {
        return Ok(());
    }
    let addr: std::net::SocketAddr = config
        .listen
        .parse()
        .with_context(|| format!("Invalid metrics.listen address: {}", config.listen))?;

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}

#[cfg(not(feature = "prometheus"))]
fn install_metrics(config: &MetricsConfig) -> Result<()> {
    if !config.listen.is_empty() {
        tracing::warn!("metrics.listen is set but the prometheus feature is disabled");
    }
    Ok(())
}
