#![forbid(unsafe_code)]

//! HTTP worker: metadata lookups, downloads, artifact serving, plus the
//! background sweep and engine update jobs.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use vidfetch_worker::{
    config::{self, DEFAULT_CONFIG_PATH},
    engine::YtDlp,
    scheduler::{MaintenanceScheduler, SchedulerConfig},
    server::{self, AppState},
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Video download worker service.")]
struct Cli {
    #[arg(
        long = "config",
        value_name = "PATH",
        default_value = DEFAULT_CONFIG_PATH,
        help = "Path to the env-style config file"
    )]
    config: PathBuf,
    #[arg(long = "host", value_name = "ADDR", help = "Address to bind")]
    host: Option<String>,
    #[arg(short = 'p', long = "port", value_name = "PORT", help = "Port to listen on")]
    port: Option<u16>,
    #[arg(
        long = "scratch-dir",
        value_name = "PATH",
        help = "Directory holding downloaded files until they are served"
    )]
    scratch_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    vidfetch_worker::init_logging();
    let cli = Cli::parse();

    let mut config = config::load_service_config(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(dir) = cli.scratch_dir {
        config.scratch_dir = dir;
    }

    tokio::fs::create_dir_all(&config.scratch_dir)
        .await
        .with_context(|| format!("creating {}", config.scratch_dir.display()))?;

    let scheduler = MaintenanceScheduler::start(SchedulerConfig::from(&config));
    let engine = Arc::new(YtDlp::new(config.ytdlp_program.clone()));
    let state = AppState::new(engine, &config, scheduler.running_flag());
    let app = server::router(state);

    let addr = SocketAddr::new(
        config
            .host
            .parse()
            .with_context(|| format!("parsing host {}", config.host))?,
        config.port,
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    tracing::info!(
        %addr,
        scratch_dir = %config.scratch_dir.display(),
        engine = %config.ytdlp_program.display(),
        "worker listening"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server");

    scheduler.shutdown().await;
    served
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", err);
    }
    tracing::info!("shutdown requested");
}
