//! Background maintenance: the retention sweep and the engine self-update,
//! each on its own interval. Started and stopped explicitly alongside the
//! HTTP server.

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{
    task::{self, JoinHandle},
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{config::ServiceConfig, retention, updater};

/// Shortest period either job will run at; `tokio::time::interval` rejects zero.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub scratch_dir: PathBuf,
    pub retention_max_age: Duration,
    pub sweep_interval: Duration,
    pub update_interval: Duration,
    pub update_on_start: bool,
    pub update_command: Vec<String>,
    pub update_timeout: Duration,
}

impl From<&ServiceConfig> for SchedulerConfig {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            scratch_dir: config.scratch_dir.clone(),
            retention_max_age: config.retention_max_age,
            sweep_interval: config.sweep_interval,
            update_interval: config.update_interval,
            update_on_start: config.update_on_start,
            update_command: config.update_command.clone(),
            update_timeout: config.update_timeout,
        }
    }
}

/// Handle to the running maintenance tasks.
pub struct MaintenanceScheduler {
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MaintenanceScheduler {
    /// Spawns both jobs on the current tokio runtime. The sweep fires
    /// immediately, then every `sweep_interval`.
    pub fn start(config: SchedulerConfig) -> Self {
        let cancel = CancellationToken::new();
        let running = Arc::new(AtomicBool::new(true));

        let sweep_task = tokio::spawn(sweep_loop(
            config.scratch_dir.clone(),
            config.retention_max_age,
            config.sweep_interval,
            cancel.clone(),
        ));
        let update_task = tokio::spawn(update_loop(config, cancel.clone()));

        tracing::info!("maintenance scheduler started");
        Self {
            running,
            cancel,
            tasks: Mutex::new(vec![sweep_task, update_task]),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Shared flag other components can poll without holding the scheduler.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Cancels both jobs and waits for them to wind down. An update already
    /// in flight is abandoned and its child process killed.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for handle in tasks {
            if let Err(err) = handle.await {
                tracing::warn!("maintenance task ended abnormally: {err}");
            }
        }
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("maintenance scheduler stopped");
    }
}

async fn sweep_loop(
    scratch_dir: PathBuf,
    max_age: Duration,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(every.max(MIN_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let dir = scratch_dir.clone();
        match task::spawn_blocking(move || retention::sweep(&dir, max_age)).await {
            Ok(Ok(removed)) => tracing::info!(removed, "scheduled sweep finished"),
            Ok(Err(err)) => tracing::warn!("scheduled sweep failed: {err:#}"),
            Err(err) => tracing::warn!("scheduled sweep panicked: {err}"),
        }
    }
}

async fn update_loop(config: SchedulerConfig, cancel: CancellationToken) {
    let mut ticker = time::interval(config.update_interval.max(MIN_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    if !config.update_on_start {
        ticker.tick().await;
    }
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = updater::update_engine(&config.update_command, config.update_timeout) => {}
        }
    }
}
