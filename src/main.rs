//! tccpf-watchdog
//!
//! Observes cluster records and retires `cluster-<name>-tccpf` stacks that no
//! longer serve a purpose.

use anyhow::{Context, Result, bail};
use clap::Parser;
use common::cli::{Cli, Commands, utils};
use common::config::Configuration;
use std::sync::Arc;
use watchdog::aws::AwsClientFactory;
use watchdog::scheduler::{Scheduler, SchedulerConfig};
use watchdog::source::FileClusterSource;
use watchdog::{EngineConfig, Reconciler};

/// Waits for a shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => log::info!("Received SIGINT"),
            _ = sigterm.recv() => log::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        log::info!("Received Ctrl+C");
    }

    Ok(())
}

async fn build_scheduler(config: &Configuration) -> Result<Scheduler> {
    utils::validate_config(config)?;

    let engine =
        EngineConfig::try_from(&config.watchdog).context("Invalid watchdog configuration")?;
    let clients = AwsClientFactory::from_config(&config.aws).await;
    let reconciler = Reconciler::new(engine, Arc::new(clients));

    log::info!("Reading cluster records from {}", config.clusters.path);
    let source = FileClusterSource::new(&config.clusters.path);

    Ok(Scheduler::new(
        Arc::new(reconciler),
        Arc::new(source),
        SchedulerConfig::from(&config.watchdog),
    ))
}

async fn run_once(config: &Configuration) -> Result<()> {
    let mut scheduler = build_scheduler(config).await?;

    let summary = scheduler
        .tick()
        .await
        .context("Failed to list cluster records")?;
    scheduler.reconciler().metrics().summary().log();

    if summary.failed > 0 {
        bail!(
            "{} of {} reconciles failed",
            summary.failed,
            summary.reconciled
        );
    }
    Ok(())
}

async fn run(config: &Configuration) -> Result<()> {
    let scheduler = build_scheduler(config).await?;

    log::info!(
        "Watchdog started: classifier={}, dry_run={}, tick interval={:?}",
        config.watchdog.classifier,
        config.watchdog.dry_run,
        config.watchdog.tick_interval
    );
    let scheduler_task = tokio::spawn(scheduler.run());

    log::info!("Watchdog running, waiting for shutdown signal");
    wait_for_shutdown_signal().await?;

    log::info!("Received shutdown signal, stopping watchdog");
    scheduler_task.abort();

    log::info!("Watchdog stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on CLI arguments
    utils::init_logging(&cli.common);

    let config = utils::load_config(cli.common.config.as_ref())?;

    match cli.command.unwrap_or_default() {
        Commands::Config { json } => utils::display_config(&config, json),
        Commands::Validate => utils::validate_config(&config),
        Commands::Once => run_once(&config).await,
        Commands::Run => run(&config).await,
    }
}
