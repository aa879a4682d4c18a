//! Liveness probe data: disk and memory usage plus the state of the scratch
//! directory and scheduler.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use sysinfo::{Disks, System};

use crate::retention;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskUsage {
    pub mount_point: PathBuf,
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScratchStatus {
    pub path: PathBuf,
    pub accessible: bool,
    pub pending_files: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub uptime_seconds: u64,
    /// `None` when no mounted filesystem could be matched to the scratch dir.
    pub disk: Option<DiskUsage>,
    pub memory: MemoryUsage,
    pub scratch_dir: ScratchStatus,
    pub scheduler_running: bool,
}

/// Signature of [`gather`]; the HTTP layer holds one so it can be swapped.
pub type Gatherer = fn(&Path, u64, bool) -> Result<HealthReport>;

/// Gathers every metric. Blocking; call from `spawn_blocking`.
pub fn gather(
    scratch_dir: &Path,
    uptime_seconds: u64,
    scheduler_running: bool,
) -> Result<HealthReport> {
    let accessible = std::fs::read_dir(scratch_dir).is_ok();
    let pending_files = if accessible {
        retention::pending_files(scratch_dir).context("counting pending files")?
    } else {
        0
    };

    let mut system = System::new();
    system.refresh_memory();
    let memory = MemoryUsage {
        total_bytes: system.total_memory(),
        used_bytes: system.used_memory(),
    };

    Ok(HealthReport {
        status: "healthy",
        uptime_seconds,
        disk: disk_usage(scratch_dir)?,
        memory,
        scratch_dir: ScratchStatus {
            path: scratch_dir.to_path_buf(),
            accessible,
            pending_files,
        },
        scheduler_running,
    })
}

/// Usage of the filesystem holding `dir`: the mount point that is the
/// longest prefix of its absolute path.
fn disk_usage(dir: &Path) -> Result<Option<DiskUsage>> {
    let absolute = match dir.canonicalize() {
        Ok(path) => path,
        Err(_) => std::env::current_dir()
            .context("resolving working directory")?
            .join(dir),
    };

    let disks = Disks::new_with_refreshed_list();
    let best = disks
        .list()
        .iter()
        .filter(|disk| absolute.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len());

    Ok(best.map(|disk| {
        let total = disk.total_space();
        let free = disk.available_space();
        DiskUsage {
            mount_point: disk.mount_point().to_path_buf(),
            total_bytes: total,
            free_bytes: free,
            used_bytes: total.saturating_sub(free),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn reports_scratch_state() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("a.mp4"), "x")?;
        fs::write(dir.path().join("b.mp3"), "x")?;

        let report = gather(dir.path(), 42, true)?;
        assert_eq!(report.status, "healthy");
        assert_eq!(report.uptime_seconds, 42);
        assert!(report.scheduler_running);
        assert!(report.scratch_dir.accessible);
        assert_eq!(report.scratch_dir.pending_files, 2);
        assert!(report.memory.total_bytes >= report.memory.used_bytes);
        if let Some(disk) = report.disk {
            assert!(disk.total_bytes >= disk.used_bytes);
        }
        Ok(())
    }

    #[test]
    fn missing_scratch_dir_is_reported_not_raised() -> Result<()> {
        let dir = tempdir()?;
        let report = gather(&dir.path().join("missing"), 0, false)?;
        assert!(!report.scratch_dir.accessible);
        assert_eq!(report.scratch_dir.pending_files, 0);
        Ok(())
    }

    #[test]
    fn serializes_camel_case() -> Result<()> {
        let dir = tempdir()?;
        let json = serde_json::to_value(gather(dir.path(), 1, false)?)?;
        assert_eq!(json["scratchDir"]["pendingFiles"], 0);
        assert_eq!(json["schedulerRunning"], false);
        assert!(json.get("uptimeSeconds").is_some());
        Ok(())
    }
}
