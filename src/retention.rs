//! Time based expiry of scratch-directory artifacts.
//!
//! Only direct children are considered and only regular files are removed.
//! A file that cannot be deleted (still being written, still being served) is
//! logged and skipped; the sweep carries on with the rest.

use std::{
    path::Path,
    time::{Duration, SystemTime},
};

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// Files older than this are eligible for removal under the default policy.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(3600);
/// How often the background sweep runs under the default policy.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Removes every regular file whose age exceeds `max_age`. Returns the number
/// of files deleted. A missing directory counts as nothing to do.
pub fn sweep(scratch_dir: &Path, max_age: Duration) -> Result<usize> {
    let now = SystemTime::now();
    remove_matching(scratch_dir, |path| {
        let modified = std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .with_context(|| format!("reading mtime of {}", path.display()))?;
        // A clock skewed into the future yields a zero age, never an expiry.
        let age = now.duration_since(modified).unwrap_or_default();
        Ok(age > max_age)
    })
}

/// Removes every regular file regardless of age.
pub fn sweep_all(scratch_dir: &Path) -> Result<usize> {
    remove_matching(scratch_dir, |_| Ok(true))
}

/// Number of regular files currently waiting in the scratch directory.
pub fn pending_files(scratch_dir: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in WalkDir::new(scratch_dir).min_depth(1).max_depth(1) {
        let entry =
            entry.with_context(|| format!("listing {}", scratch_dir.display()))?;
        if entry.file_type().is_file() {
            count += 1;
        }
    }
    Ok(count)
}

fn remove_matching<F>(scratch_dir: &Path, mut expired: F) -> Result<usize>
where
    F: FnMut(&Path) -> Result<bool>,
{
    if !scratch_dir.exists() {
        tracing::info!(
            dir = %scratch_dir.display(),
            "scratch directory does not exist, nothing to sweep"
        );
        return Ok(0);
    }

    let mut removed = 0;
    for entry in WalkDir::new(scratch_dir).min_depth(1).max_depth(1) {
        let entry =
            entry.with_context(|| format!("listing {}", scratch_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        match expired(path) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(err) => {
                tracing::warn!(file = %path.display(), "skipping during sweep: {err:#}");
                continue;
            }
        }

        match std::fs::remove_file(path) {
            Ok(()) => {
                tracing::debug!(file = %path.display(), "removed expired artifact");
                removed += 1;
            }
            Err(err) => {
                tracing::warn!(file = %path.display(), "could not remove artifact: {err}");
            }
        }
    }

    tracing::info!(removed, dir = %scratch_dir.display(), "sweep complete");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::tempdir;

    fn aged_file(dir: &Path, name: &str, age: Duration) -> Result<()> {
        let path = dir.join(name);
        let file = File::create(&path)?;
        file.set_modified(SystemTime::now() - age)?;
        Ok(())
    }

    #[test]
    fn sweep_removes_only_files_past_threshold() -> Result<()> {
        let dir = tempdir()?;
        aged_file(dir.path(), "fresh.mp4", Duration::from_secs(30 * 60))?;
        aged_file(dir.path(), "stale.mp4", Duration::from_secs(61 * 60))?;
        aged_file(dir.path(), "ancient.mp3", Duration::from_secs(120 * 60))?;

        let removed = sweep(dir.path(), DEFAULT_MAX_AGE)?;
        assert_eq!(removed, 2);
        assert!(dir.path().join("fresh.mp4").exists());
        assert!(!dir.path().join("stale.mp4").exists());
        assert!(!dir.path().join("ancient.mp3").exists());
        Ok(())
    }

    #[test]
    fn sweep_ignores_nested_directories() -> Result<()> {
        let dir = tempdir()?;
        let nested = dir.path().join("nested");
        fs::create_dir(&nested)?;
        aged_file(&nested, "old.mp4", Duration::from_secs(7200))?;

        assert_eq!(sweep(dir.path(), DEFAULT_MAX_AGE)?, 0);
        assert!(nested.join("old.mp4").exists());
        Ok(())
    }

    #[test]
    fn sweep_all_clears_every_file() -> Result<()> {
        let dir = tempdir()?;
        aged_file(dir.path(), "a.mp4", Duration::from_secs(1))?;
        aged_file(dir.path(), "b.mp3", Duration::from_secs(7200))?;
        fs::create_dir(dir.path().join("keep"))?;

        assert_eq!(sweep_all(dir.path())?, 2);
        assert_eq!(pending_files(dir.path())?, 0);
        assert!(dir.path().join("keep").is_dir());
        Ok(())
    }

    #[test]
    fn missing_directory_is_not_an_error() -> Result<()> {
        let dir = tempdir()?;
        let missing = dir.path().join("gone");
        assert_eq!(sweep(&missing, DEFAULT_MAX_AGE)?, 0);
        assert_eq!(sweep_all(&missing)?, 0);
        Ok(())
    }

    #[test]
    fn pending_files_counts_direct_children() -> Result<()> {
        let dir = tempdir()?;
        aged_file(dir.path(), "a.mp4", Duration::ZERO)?;
        aged_file(dir.path(), "b.mp4", Duration::ZERO)?;
        fs::create_dir(dir.path().join("sub"))?;
        assert_eq!(pending_files(dir.path())?, 2);
        Ok(())
    }
}
