use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Command line of the `tccpf-watchdog` binary
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Retires vestigial tccpf CloudFormation stacks", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Arguments shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone, Default, PartialEq, Eq)]
pub enum Commands {
    /// Reconcile continuously until SIGINT/SIGTERM (default behavior)
    #[default]
    Run,
    /// Reconcile every known cluster once and exit
    Once,
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Default filter directive derived from the CLI flags.
    pub fn log_level(args: &CommonArgs) -> &'static str {
        if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Initialize logging based on CLI arguments. `RUST_LOG` wins when set.
    pub fn init_logging(args: &CommonArgs) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level(args)));

        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            let watchdog = &config.watchdog;
            println!("tccpf-watchdog Configuration:");
            println!("=============================");
            println!(
                "AWS region: {}",
                config.aws.region.as_deref().unwrap_or("<default chain>")
            );
            println!(
                "AWS role: {}",
                config.aws.role_arn.as_deref().unwrap_or("<none>")
            );
            println!("AWS call timeout: {:?}", config.aws.call_timeout);
            println!("Classifier: {}", watchdog.classifier);
            println!("Route resource type: {}", watchdog.route_resource_type);
            println!("Dry run: {}", watchdog.dry_run);
            println!(
                "Legacy eligibility gate: {} (label {}, threshold {})",
                watchdog.eligibility.is_required(watchdog.classifier),
                watchdog.eligibility.version_label,
                watchdog.eligibility.threshold
            );
            println!("Cycle timeout: {:?}", watchdog.cycle_timeout);
            println!("Resync interval: {:?}", watchdog.resync_interval);
            println!(
                "Max concurrent reconciles: {}",
                watchdog.max_concurrent_reconciles
            );
            println!("Cluster source: {}", config.clusters.path);
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        log::info!("Validating configuration...");
        config.validate().context("Invalid configuration")?;
        log::info!("Configuration validation passed");
        Ok(())
    }
}
