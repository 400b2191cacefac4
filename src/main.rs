//! argo-ingest CLI entry point

use argo_ingest::{
    commands::{
        cmd_init, cmd_inspect, cmd_once, cmd_run, cmd_summary, print_inspection,
        print_job_report, print_scheduler_stats, print_summary,
    },
    config::Config,
    error::{Error, Result},
    logging,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "argo-ingest")]
#[command(version, about = "Incremental Argo profile ingestion into SQLite", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Defaults to `run`
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// Write a default configuration and create the working directories
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Run ingestion jobs periodically until interrupted
    Run {
        /// Minutes between jobs (overrides config and ARGO_INGEST_INTERVAL_MINUTES)
        #[arg(long)]
        interval_minutes: Option<u64>,

        /// Wait for the first interval instead of running a job immediately
        #[arg(long)]
        no_startup_run: bool,
    },

    /// Run a single ingestion job and exit
    Once,

    /// Print summary statistics of the profile store
    Summary,

    /// Show what would be extracted from one archive
    Inspect {
        /// Archive file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.clone().unwrap_or(Commands::Run {
        interval_minutes: None,
        no_startup_run: false,
    });

    let config = match command {
        Commands::Init { .. } | Commands::Inspect { .. } => None,
        _ => Some(Config::load_or_default(cli.config.as_deref())),
    };

    // Operational log files only for commands that run the pipeline
    let log_dir = match (&command, &config) {
        (Commands::Run { .. } | Commands::Once, Some(Ok(config))) => {
            Some(config.paths.log_dir.clone())
        }
        _ => None,
    };
    if let Err(e) = logging::init(cli.verbose, log_dir.as_deref()) {
        eprintln!("{}", e);
    }
    let config = config.transpose()?;

    match command {
        Commands::Init { force } => {
            let config_path = cli
                .config
                .clone()
                .unwrap_or_else(Config::default_config_path);
            let base_dir = config_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(Config::default_base_dir);
            let written = cmd_init(&base_dir, &config_path, force).await?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({ "config": written }))?
                );
            } else {
                println!("✓ Wrote config to {}", written.display());
            }
        }

        Commands::Run {
            interval_minutes,
            no_startup_run,
        } => {
            let mut config = require(config)?;
            if let Some(minutes) = interval_minutes {
                config.scheduler.interval_minutes = minutes;
                config.validate()?;
            }
            if no_startup_run {
                config.scheduler.run_on_startup = false;
            }

            let stats = cmd_run(config, shutdown_token()).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_scheduler_stats(&stats);
            }
        }

        Commands::Once => {
            let config = require(config)?;
            let report = cmd_once(config, shutdown_token()).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_job_report(&report);
            }
        }

        Commands::Summary => {
            let config = require(config)?;
            let info = cmd_summary(&config).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                print_summary(&info);
            }
        }

        Commands::Inspect { file } => {
            let inspection = cmd_inspect(&file)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&inspection)?);
            } else {
                print_inspection(&inspection);
            }
        }
    }

    Ok(())
}

fn require(config: Option<Config>) -> Result<Config> {
    config.ok_or_else(|| Error::Config("configuration was not loaded".to_string()))
}

/// Token cancelled on Ctrl-C; the running stage is allowed to finish
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received; stopping after the current stage");
            token.cancel();
        }
    });
    cancel
}
