#![forbid(unsafe_code)]

//! Video download worker.
//!
//! Looks up metadata and downloads through an external `yt-dlp`, keeps the
//! results in a scratch directory, serves them back over HTTP and expires them
//! on a timer. The binaries under `src/bin` wire these modules together.

pub mod artifact;
pub mod config;
pub mod engine;
pub mod error;
pub mod formats;
pub mod health;
pub mod retention;
pub mod scheduler;
pub mod server;
pub mod updater;

/// Installs the `tracing` subscriber used by every binary. `RUST_LOG`
/// overrides the default `info` level.
pub fn init_logging() {
    use tracing_subscriber::{EnvFilter, filter::LevelFilter};

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();
}
