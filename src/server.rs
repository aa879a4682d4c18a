//! HTTP surface of the worker and the request flows behind it.
//!
//! Metadata: engine lookup, then format normalization.
//! Download: engine lookup for the title, engine download, artifact lookup.
//! Serve: stream the artifact back, then delete it after a short delay.
//!
//! No flow retries. Two downloads that sanitize to the same title share one
//! output path in the scratch directory and can overwrite each other.

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, Query, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use tokio::{fs::File, task};
use tokio_util::io::ReaderStream;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    artifact::{self, MediaKind},
    config::ServiceConfig,
    engine::{EngineOptions, MediaEngine, PostProcessor},
    error::{ServiceError, ServiceResult},
    formats::{self, FormatChoice},
    health::{self, HealthReport},
    retention,
    updater::{self, UpdateReport},
};

pub const DEFAULT_AUDIO_BITRATE: &str = "192";
const AUDIO_SELECTOR: &str = "bestaudio/best";
const BEST_VIDEO_SELECTOR: &str = "bestvideo+bestaudio/best";
const FALLBACK_TITLE: &str = "video";

#[derive(Clone)]
pub struct AppState {
    engine: Arc<dyn MediaEngine>,
    settings: Arc<Settings>,
    scheduler_running: Arc<AtomicBool>,
    health_gatherer: health::Gatherer,
}

struct Settings {
    scratch_dir: PathBuf,
    retention_max_age: Duration,
    update_command: Vec<String>,
    update_timeout: Duration,
    serve_delete_delay: Duration,
    started: Instant,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct VideoInfoRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    #[serde(default)]
    pub quality: Option<String>,
    pub format: String,
}

#[derive(Debug, Serialize)]
pub struct VideoInfoResponse {
    pub title: String,
    pub duration: u64,
    pub thumbnail: String,
    pub formats: Vec<FormatChoice>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    pub success: bool,
    pub download_url: String,
    pub filename: String,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub removed: usize,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CleanupParams {
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RootResponse {
    status: &'static str,
    version: &'static str,
    started_at: DateTime<Utc>,
    uptime_seconds: u64,
}

impl AppState {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        config: &ServiceConfig,
        scheduler_running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            engine,
            settings: Arc::new(Settings {
                scratch_dir: config.scratch_dir.clone(),
                retention_max_age: config.retention_max_age,
                update_command: config.update_command.clone(),
                update_timeout: config.update_timeout,
                serve_delete_delay: config.serve_delete_delay,
                started: Instant::now(),
                started_at: Utc::now(),
            }),
            scheduler_running,
            health_gatherer: health::gather,
        }
    }

    /// Replaces the health gatherer used by `GET /health`.
    pub fn with_health_gatherer(mut self, gatherer: health::Gatherer) -> Self {
        self.health_gatherer = gatherer;
        self
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.settings.scratch_dir
    }

    fn uptime_seconds(&self) -> u64 {
        self.settings.started.elapsed().as_secs()
    }

    async fn ensure_scratch_dir(&self) -> ServiceResult<()> {
        tokio::fs::create_dir_all(self.scratch_dir())
            .await
            .map_err(|err| {
                ServiceError::Internal(format!(
                    "creating {}: {err}",
                    self.scratch_dir().display()
                ))
            })
    }

    pub async fn video_info(&self, url: &str) -> ServiceResult<VideoInfoResponse> {
        let url = validate_url(url)?;
        let info = self
            .engine
            .fetch_info(url)
            .await
            .map_err(|err| ServiceError::MetadataFetchFailed(err.to_string()))?;

        Ok(VideoInfoResponse {
            title: info.title.unwrap_or_else(|| "Unknown".to_owned()),
            duration: info.duration.map(|secs| secs.max(0.0) as u64).unwrap_or(0),
            thumbnail: info.thumbnail.unwrap_or_default(),
            formats: formats::normalize(&info.formats),
        })
    }

    pub async fn download(&self, request: &DownloadRequest) -> ServiceResult<DownloadResponse> {
        let url = validate_url(&request.url)?;
        let kind: MediaKind = request
            .format
            .parse()
            .map_err(ServiceError::InvalidRequest)?;
        self.ensure_scratch_dir().await?;

        let info = self
            .engine
            .fetch_info(url)
            .await
            .map_err(|err| ServiceError::DownloadFailed(err.to_string()))?;
        let title = artifact::sanitize_title(
            info.title
                .as_deref()
                .filter(|title| !title.is_empty())
                .unwrap_or(FALLBACK_TITLE),
        );

        let options =
            download_options(self.scratch_dir(), &title, kind, request.quality.as_deref());
        tracing::info!(%url, %kind, %title, "starting download");
        self.engine
            .download(url, &options)
            .await
            .map_err(|err| ServiceError::DownloadFailed(err.to_string()))?;

        let path = artifact::resolve(self.scratch_dir(), &title, kind)
            .map_err(|err| ServiceError::DownloadFailed(err.to_string()))?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| artifact::artifact_filename(&title, kind));

        tracing::info!(file = %path.display(), "download ready");
        Ok(DownloadResponse {
            success: true,
            download_url: format!("/download/{filename}"),
            filename,
        })
    }

    /// Opens the artifact for streaming and schedules its deletion.
    pub async fn serve(&self, filename: &str) -> ServiceResult<Response> {
        let not_found = || ServiceError::NotFound("File not found".to_owned());
        let path = artifact::scratch_path(self.scratch_dir(), filename).ok_or_else(not_found)?;
        let metadata = tokio::fs::metadata(&path).await.map_err(|_| not_found())?;
        if !metadata.is_file() {
            return Err(not_found());
        }

        let file = File::open(&path).await.map_err(|_| not_found())?;
        let mime = MimeGuess::from_path(&path).first_or_octet_stream();
        let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
            headers.insert(header::CONTENT_TYPE, value);
        }
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
        if let Ok(value) = HeaderValue::from_str(&content_disposition(filename)) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }

        schedule_removal(path, self.settings.serve_delete_delay);
        Ok(response)
    }

    pub async fn cleanup(&self, all: bool) -> ServiceResult<CleanupResponse> {
        let dir = self.scratch_dir().to_path_buf();
        let max_age = self.settings.retention_max_age;
        let removed = task::spawn_blocking(move || {
            if all {
                retention::sweep_all(&dir)
            } else {
                retention::sweep(&dir, max_age)
            }
        })
        .await
        .map_err(|err| ServiceError::Internal(format!("task join error: {err}")))?
        .map_err(|err| ServiceError::Internal(format!("{err:#}")))?;

        Ok(CleanupResponse {
            removed,
            message: format!("Cleaned up {removed} old files"),
        })
    }

    pub async fn health(&self) -> ServiceResult<HealthReport> {
        let dir = self.scratch_dir().to_path_buf();
        let uptime = self.uptime_seconds();
        let running = self.scheduler_running.load(Ordering::SeqCst);
        let gatherer = self.health_gatherer;
        task::spawn_blocking(move || gatherer(&dir, uptime, running))
            .await
            .map_err(|err| ServiceError::HealthCheckFailed(format!("task join error: {err}")))?
            .map_err(|err| ServiceError::HealthCheckFailed(format!("{err:#}")))
    }
}

/// Builds the engine options for one download: selector, output template and
/// the post-processing step that converges on the target container.
pub fn download_options(
    scratch_dir: &Path,
    title: &str,
    kind: MediaKind,
    quality: Option<&str>,
) -> EngineOptions {
    let quality = quality.map(str::trim).filter(|value| !value.is_empty());
    let (format, post_processor) = match kind {
        MediaKind::Audio => {
            let bitrate = quality
                .filter(|value| value.bytes().all(|b| b.is_ascii_digit()))
                .unwrap_or(DEFAULT_AUDIO_BITRATE);
            (
                AUDIO_SELECTOR.to_owned(),
                PostProcessor::ExtractAudio {
                    codec: kind.target_extension().to_owned(),
                    bitrate: bitrate.to_owned(),
                },
            )
        }
        MediaKind::Video => (
            quality
                .map(|id| format!("{id}+bestaudio/best"))
                .unwrap_or_else(|| BEST_VIDEO_SELECTOR.to_owned()),
            PostProcessor::MergeVideo {
                container: kind.target_extension().to_owned(),
            },
        ),
    };

    EngineOptions {
        output_template: Some(artifact::output_template(scratch_dir, title)),
        format: Some(format),
        post_processor: Some(post_processor),
        ..Default::default()
    }
}

/// Returns the trimmed URL that passed validation; callers forward that
/// string, not the raw input.
fn validate_url(raw: &str) -> ServiceResult<&str> {
    let trimmed = raw.trim();
    let invalid = || ServiceError::InvalidRequest(format!("Invalid video URL: {raw:?}"));
    let parsed = url::Url::parse(trimmed).map_err(|_| invalid())?;
    match parsed.scheme() {
        "http" | "https" if parsed.host().is_some() => Ok(trimmed),
        _ => Err(invalid()),
    }
}

fn content_disposition(filename: &str) -> String {
    let ascii: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();
    format!("attachment; filename=\"{ascii}\"")
}

/// Best-effort delete once the transfer has had time to finish. An already
/// opened handle keeps streaming on unix even after the unlink.
fn schedule_removal(path: PathBuf, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!(file = %path.display(), "removed served artifact"),
            Err(err) => {
                tracing::warn!(file = %path.display(), "could not remove served artifact: {err}")
            }
        }
    });
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/api/video-info", post(video_info))
        .route("/api/download", post(download))
        .route("/download/{filename}", get(serve_file))
        .route("/api/cleanup", delete(cleanup))
        .route("/api/update-ytdlp", post(update_ytdlp))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    Json(RootResponse {
        status: "Video Download Worker Service",
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.settings.started_at,
        uptime_seconds: state.uptime_seconds(),
    })
}

async fn health_check(State(state): State<AppState>) -> ServiceResult<Json<HealthReport>> {
    Ok(Json(state.health().await?))
}

async fn video_info(
    State(state): State<AppState>,
    Json(request): Json<VideoInfoRequest>,
) -> ServiceResult<Json<VideoInfoResponse>> {
    Ok(Json(state.video_info(&request.url).await?))
}

async fn download(
    State(state): State<AppState>,
    Json(request): Json<DownloadRequest>,
) -> ServiceResult<Json<DownloadResponse>> {
    Ok(Json(state.download(&request).await?))
}

async fn serve_file(
    State(state): State<AppState>,
    AxumPath(filename): AxumPath<String>,
) -> ServiceResult<Response> {
    state.serve(&filename).await
}

async fn cleanup(
    State(state): State<AppState>,
    Query(params): Query<CleanupParams>,
) -> ServiceResult<Json<CleanupResponse>> {
    Ok(Json(state.cleanup(params.all).await?))
}

async fn update_ytdlp(State(state): State<AppState>) -> Json<UpdateReport> {
    let outcome =
        updater::update_engine(&state.settings.update_command, state.settings.update_timeout)
            .await;
    Json(UpdateReport::from(&outcome))
}
