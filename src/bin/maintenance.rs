#![forbid(unsafe_code)]

//! One-shot maintenance for the worker's scratch directory and engine, for
//! cron jobs or manual resets while the service is down.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use vidfetch_worker::{
    config::{self, DEFAULT_CONFIG_PATH},
    retention, updater,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Scratch directory and engine maintenance.")]
struct Cli {
    #[arg(
        long = "config",
        value_name = "PATH",
        default_value = DEFAULT_CONFIG_PATH,
        help = "Path to the env-style config file"
    )]
    config: PathBuf,
    #[arg(
        long = "scratch-dir",
        value_name = "PATH",
        help = "Override the scratch directory"
    )]
    scratch_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Delete expired files (or every file with --all).
    Sweep {
        #[arg(long = "all", help = "Remove every file regardless of age")]
        all: bool,
        #[arg(
            long = "max-age-secs",
            value_name = "SECS",
            help = "Override the retention threshold"
        )]
        max_age_secs: Option<u64>,
    },
    /// Upgrade the extraction engine.
    Update,
}

#[tokio::main]
async fn main() -> Result<()> {
    vidfetch_worker::init_logging();
    let cli = Cli::parse();
    let mut config = config::load_service_config(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(dir) = cli.scratch_dir {
        config.scratch_dir = dir;
    }

    match cli.command {
        Command::Sweep { all, max_age_secs } => {
            let removed = if all {
                retention::sweep_all(&config.scratch_dir)?
            } else {
                let max_age = max_age_secs
                    .map(std::time::Duration::from_secs)
                    .unwrap_or(config.retention_max_age);
                retention::sweep(&config.scratch_dir, max_age)?
            };
            println!("Removed {removed} file(s) from {}", config.scratch_dir.display());
            Ok(())
        }
        Command::Update => {
            let outcome =
                updater::update_engine(&config.update_command, config.update_timeout).await;
            println!("{}", outcome.message());
            if !outcome.is_success() {
                bail!("engine update did not succeed ({})", outcome.label());
            }
            Ok(())
        }
    }
}
