//! Thin driver around the `yt-dlp` executable.
//!
//! Extraction, format negotiation and transcoding all happen inside yt-dlp
//! (and the ffmpeg it shells out to). This module only turns a typed options
//! struct into command-line flags, runs the process and decodes its JSON.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;

use crate::formats::FormatDescriptor;

pub const DEFAULT_PROGRAM: &str = "yt-dlp";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("could not start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// The process ran but exited unsuccessfully; carries its stderr.
    #[error("{0}")]
    Failed(String),
    #[error("unreadable metadata: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Subset of `yt-dlp --dump-single-json` the service cares about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoInfo {
    pub title: Option<String>,
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub formats: Vec<FormatDescriptor>,
}

/// Post-download conversion step, carried out by ffmpeg under yt-dlp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostProcessor {
    /// Drop the video track and transcode audio to `codec` at `bitrate` kbps.
    ExtractAudio { codec: String, bitrate: String },
    /// Merge separate video and audio streams into `container`, and remux a
    /// single pre-muxed stream into it as well.
    MergeVideo { container: String },
}

/// Options for one engine invocation.
///
/// Defaults: quiet and warning-free, no output template (engine default),
/// no format selector (engine default), no post-processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub quiet: bool,
    pub no_warnings: bool,
    pub output_template: Option<PathBuf>,
    pub format: Option<String>,
    pub post_processor: Option<PostProcessor>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            quiet: true,
            no_warnings: true,
            output_template: None,
            format: None,
            post_processor: None,
        }
    }
}

impl EngineOptions {
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if self.quiet {
            args.push("--quiet".into());
        }
        if self.no_warnings {
            args.push("--no-warnings".into());
        }
        if let Some(format) = &self.format {
            args.push("--format".into());
            args.push(format.into());
        }
        if let Some(template) = &self.output_template {
            args.push("--output".into());
            args.push(template.clone().into_os_string());
        }
        match &self.post_processor {
            Some(PostProcessor::ExtractAudio { codec, bitrate }) => {
                args.push("--extract-audio".into());
                args.push("--audio-format".into());
                args.push(codec.into());
                args.push("--audio-quality".into());
                args.push(format!("{bitrate}K").into());
            }
            Some(PostProcessor::MergeVideo { container }) => {
                args.push("--merge-output-format".into());
                args.push(container.into());
                args.push("--remux-video".into());
                args.push(container.into());
            }
            None => {}
        }
        args
    }
}

/// Collaborator that knows how to look up and fetch media.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn fetch_info(&self, url: &str) -> Result<VideoInfo, EngineError>;

    /// Downloads `url`; the resulting file lands wherever
    /// `options.output_template` points.
    async fn download(&self, url: &str, options: &EngineOptions) -> Result<(), EngineError>;
}

/// Runs the real `yt-dlp` binary.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    async fn run(&self, args: Vec<OsString>) -> Result<Vec<u8>, EngineError> {
        tracing::debug!(program = %self.program.display(), ?args, "running engine");
        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| EngineError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr.trim();
            return Err(EngineError::Failed(if message.is_empty() {
                format!("{} exited with {}", self.program.display(), output.status)
            } else {
                message.to_owned()
            }));
        }

        Ok(output.stdout)
    }
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

#[async_trait]
impl MediaEngine for YtDlp {
    async fn fetch_info(&self, url: &str) -> Result<VideoInfo, EngineError> {
        let mut args = EngineOptions::default().to_args();
        args.push("--dump-single-json".into());
        args.push("--skip-download".into());
        args.push("--no-playlist".into());
        args.push(url.into());
        let stdout = self.run(args).await?;
        Ok(serde_json::from_slice(&stdout)?)
    }

    async fn download(&self, url: &str, options: &EngineOptions) -> Result<(), EngineError> {
        let mut args = options.to_args();
        args.push("--no-playlist".into());
        args.push(url.into());
        self.run(args).await.map(|_| ())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    /// Shell script standing in for yt-dlp: prints canned metadata, or writes
    /// an `.mp4` next to the requested output template.
    fn install_stub(dir: &Path) -> PathBuf {
        let script_path = dir.join("yt-dlp");
        let script = r#"#!/usr/bin/env bash
set -euo pipefail
prev=""
output=""
for arg in "$@"; do
    if [[ "$prev" == "--output" ]]; then
        output="$arg"
    fi
    prev="$arg"
done
if [[ " $* " == *" https://fail.example/ "* ]]; then
    echo "ERROR: Video unavailable" >&2
    exit 1
fi
if [[ " $* " == *" --dump-single-json "* ]]; then
cat <<'JSON'
{
  "title": "Alpha/Title",
  "duration": 125.7,
  "thumbnail": "https://img.example/alpha.jpg",
  "formats": [
    {"format_id": "137", "width": 1920, "height": 1080, "ext": "mp4", "vcodec": "avc1", "acodec": "none", "filesize": 1024},
    {"format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a"}
  ]
}
JSON
exit 0
fi
target=$(printf '%s' "$output" | sed 's/%(ext)s$/mp4/')
echo "$*" > "$target"
"#;
        fs::write(&script_path, script).unwrap();
        let mut perms = fs::metadata(&script_path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script_path, perms).unwrap();
        script_path
    }

    #[test]
    fn options_render_audio_extraction() {
        let options = EngineOptions {
            output_template: Some(PathBuf::from("downloads/Song.%(ext)s")),
            format: Some("bestaudio/best".into()),
            post_processor: Some(PostProcessor::ExtractAudio {
                codec: "mp3".into(),
                bitrate: "192".into(),
            }),
            ..Default::default()
        };
        let args: Vec<String> = options
            .to_args()
            .into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "--quiet",
                "--no-warnings",
                "--format",
                "bestaudio/best",
                "--output",
                "downloads/Song.%(ext)s",
                "--extract-audio",
                "--audio-format",
                "mp3",
                "--audio-quality",
                "192K",
            ]
        );
    }

    #[test]
    fn options_render_merge_container() {
        let options = EngineOptions {
            quiet: false,
            no_warnings: false,
            post_processor: Some(PostProcessor::MergeVideo {
                container: "mp4".into(),
            }),
            ..Default::default()
        };
        let args: Vec<String> = options
            .to_args()
            .into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec!["--merge-output-format", "mp4", "--remux-video", "mp4"]
        );
    }

    #[tokio::test]
    async fn fetch_info_decodes_stub_json() {
        let dir = tempdir().unwrap();
        let engine = YtDlp::new(install_stub(dir.path()));
        let info = engine.fetch_info("https://ok.example/").await.unwrap();
        assert_eq!(info.title.as_deref(), Some("Alpha/Title"));
        assert_eq!(info.formats.len(), 2);
        assert_eq!(info.formats[0].height, Some(1080));
    }

    #[tokio::test]
    async fn failures_surface_stderr() {
        let dir = tempdir().unwrap();
        let engine = YtDlp::new(install_stub(dir.path()));
        let err = engine.fetch_info("https://fail.example/").await.unwrap_err();
        assert_eq!(err.to_string(), "ERROR: Video unavailable");
    }

    #[tokio::test]
    async fn download_writes_through_template() {
        let dir = tempdir().unwrap();
        let engine = YtDlp::new(install_stub(dir.path()));
        let options = EngineOptions {
            output_template: Some(dir.path().join("Clip.%(ext)s")),
            format: Some("bestvideo+bestaudio/best".into()),
            ..Default::default()
        };
        engine
            .download("https://ok.example/", &options)
            .await
            .unwrap();
        let written = fs::read_to_string(dir.path().join("Clip.mp4")).unwrap();
        assert!(written.contains("bestvideo+bestaudio/best"));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let engine = YtDlp::new("/nonexistent/yt-dlp");
        let err = engine.fetch_info("https://ok.example/").await.unwrap_err();
        assert!(matches!(err, EngineError::Spawn { .. }));
    }
}
