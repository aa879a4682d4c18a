//! Keeps the extraction engine current by running an external upgrade command.
//!
//! Site extractors break often, so the worker upgrades yt-dlp at start-up, on a
//! timer and on demand. Every outcome is non-fatal.

use std::{process::Stdio, time::Duration};

use serde::Serialize;
use tokio::process::Command;

pub const DEFAULT_UPDATE_COMMAND: &str = "python3 -m pip install --upgrade yt-dlp";
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    UpToDate,
    Failed(String),
    TimedOut,
}

impl UpdateOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Updated | Self::UpToDate)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Updated => "updated",
            Self::UpToDate => "up_to_date",
            Self::Failed(_) => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Updated => "yt-dlp updated successfully".to_owned(),
            Self::UpToDate => "yt-dlp is already up to date".to_owned(),
            Self::Failed(reason) => format!("Update failed: {reason}"),
            Self::TimedOut => "Update timed out".to_owned(),
        }
    }
}

/// JSON body returned by the manual update endpoint.
#[derive(Debug, Serialize)]
pub struct UpdateReport {
    pub success: bool,
    pub outcome: &'static str,
    pub message: String,
}

impl From<&UpdateOutcome> for UpdateReport {
    fn from(outcome: &UpdateOutcome) -> Self {
        Self {
            success: outcome.is_success(),
            outcome: outcome.label(),
            message: outcome.message(),
        }
    }
}

/// Runs `command` (program followed by its arguments) and classifies the
/// result. The child is killed if it outlives `timeout`.
pub async fn update_engine(command: &[String], timeout: Duration) -> UpdateOutcome {
    let Some((program, args)) = command.split_first() else {
        return UpdateOutcome::Failed("no update command configured".to_owned());
    };

    tracing::info!(%program, "checking for engine updates");
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();
    let child = match child {
        Ok(child) => child,
        Err(err) => {
            tracing::warn!(%program, "could not start update command: {err}");
            return UpdateOutcome::Failed(err.to_string());
        }
    };

    let outcome = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Err(_) => UpdateOutcome::TimedOut,
        Ok(Err(err)) => UpdateOutcome::Failed(err.to_string()),
        Ok(Ok(output)) if output.status.success() => {
            if String::from_utf8_lossy(&output.stdout).contains("Successfully installed") {
                UpdateOutcome::Updated
            } else {
                UpdateOutcome::UpToDate
            }
        }
        Ok(Ok(output)) => {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            UpdateOutcome::Failed(if stderr.is_empty() {
                format!("exited with {}", output.status)
            } else {
                stderr
            })
        }
    };

    if outcome.is_success() {
        tracing::info!(outcome = outcome.label(), "engine update finished");
    } else {
        tracing::warn!(outcome = outcome.label(), "{}", outcome.message());
    }
    outcome
}

/// Splits a configured command line on whitespace.
pub fn parse_command(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_owned).collect()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    #[tokio::test]
    async fn detects_fresh_install() {
        let outcome = update_engine(
            &sh("echo 'Successfully installed yt-dlp-2026.1.1'"),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(outcome, UpdateOutcome::Updated);
    }

    #[tokio::test]
    async fn quiet_success_means_up_to_date() {
        let outcome = update_engine(
            &sh("echo 'Requirement already satisfied'"),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(outcome, UpdateOutcome::UpToDate);
    }

    #[tokio::test]
    async fn failure_carries_stderr() {
        let outcome =
            update_engine(&sh("echo 'no network' >&2; exit 2"), Duration::from_secs(5)).await;
        assert_eq!(outcome, UpdateOutcome::Failed("no network".into()));
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let outcome = update_engine(&sh("sleep 5"), Duration::from_millis(100)).await;
        assert_eq!(outcome, UpdateOutcome::TimedOut);
    }

    #[tokio::test]
    async fn missing_program_and_empty_command_fail() {
        let outcome =
            update_engine(&["/nonexistent/pip".to_owned()], Duration::from_secs(1)).await;
        assert!(matches!(outcome, UpdateOutcome::Failed(_)));
        let outcome = update_engine(&[], Duration::from_secs(1)).await;
        assert!(matches!(outcome, UpdateOutcome::Failed(_)));
    }

    #[test]
    fn command_line_splits_on_whitespace() {
        assert_eq!(
            parse_command(DEFAULT_UPDATE_COMMAND),
            vec!["python3", "-m", "pip", "install", "--upgrade", "yt-dlp"]
        );
    }

    #[test]
    fn report_reflects_outcome() {
        let report = UpdateReport::from(&UpdateOutcome::TimedOut);
        assert!(!report.success);
        assert_eq!(report.outcome, "timed_out");
    }
}
