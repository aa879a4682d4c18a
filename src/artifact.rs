//! Naming and locating the files yt-dlp leaves in the scratch directory.

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use thiserror::Error;

/// What the client asked for; decides the container the post-processor
/// converges on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn target_extension(self) -> &'static str {
        match self {
            Self::Audio => "mp3",
            Self::Video => "mp4",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            other => Err(format!(
                "Invalid format {other:?}. Must be \"video\" or \"audio\""
            )),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Download completed but file not found: {}", .0.display())]
    ArtifactMissing(PathBuf),
}

/// Replaces path separators so a reported title can be used as a file stem.
/// Nothing else is escaped.
pub fn sanitize_title(title: &str) -> String {
    title.replace(['/', '\\'], "_")
}

/// Output template handed to yt-dlp: fixed stem, engine-chosen extension.
pub fn output_template(scratch_dir: &Path, title: &str) -> PathBuf {
    scratch_dir.join(format!("{title}.%(ext)s"))
}

pub fn artifact_filename(title: &str, kind: MediaKind) -> String {
    format!("{title}.{}", kind.target_extension())
}

/// Looks for `{title}.{target}` only. Other containers the engine might have
/// produced are not considered a match.
pub fn resolve(scratch_dir: &Path, title: &str, kind: MediaKind) -> Result<PathBuf, ResolveError> {
    let path = scratch_dir.join(artifact_filename(title, kind));
    if path.is_file() {
        Ok(path)
    } else {
        Err(ResolveError::ArtifactMissing(path))
    }
}

/// Maps a client supplied file name onto the scratch directory. Anything that
/// is not a single plain component is rejected without touching the disk.
pub fn scratch_path(scratch_dir: &Path, filename: &str) -> Option<PathBuf> {
    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(std::path::Component::Normal(name)), None) if name == filename => {
            Some(scratch_dir.join(name))
        }
        _ => None,
    }
}
