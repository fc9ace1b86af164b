#![forbid(unsafe_code)]

//! Axum backend for the downloader page.
//!
//! Every request is independent: look up metadata through the extractor, or
//! ask it to write a file into the downloads directory, then answer with
//! JSON. Finished files are served back under `/downloads/`, and everything
//! that is not an API route falls through to the static client in the web
//! root.

use std::{
    net::{IpAddr, SocketAddr},
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, Query, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use clap::Parser;
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
    signal,
};
use tokio_util::io::ReaderStream;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vidgrab::{
    collaborator::{MediaTool, YtDlp},
    config::{ConfigOverrides, resolve_server_config},
    downloads::DownloadsDir,
    error::{FetchError, FetchResult},
    filename::{download_filename, is_valid_extension},
    media::{DownloadRequest, DownloadResult, FormatSummary, VideoInfo, format_summaries},
    selector::{DEFAULT_EXTENSION, DownloadPlan},
};

const DEFAULT_LOG_FILTER: &str = "vidgrab=info,backend=info,tower_http=info";

#[derive(Debug, Parser)]
#[command(about = "Video downloader API server")]
struct BackendArgs {
    /// Port to listen on (env: PORT, default 3001).
    #[arg(long)]
    port: Option<u16>,
    /// Address to bind (env: HOST, default 127.0.0.1).
    #[arg(long)]
    host: Option<String>,
    /// Where finished downloads are written and served from.
    #[arg(long)]
    downloads_dir: Option<PathBuf>,
    /// Directory holding the static client page.
    #[arg(long)]
    www_root: Option<PathBuf>,
    /// Path to the yt-dlp executable.
    #[arg(long = "ytdlp")]
    ytdlp_bin: Option<PathBuf>,
    /// dotenv file to read before the process environment.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl BackendArgs {
    fn into_overrides(self) -> ConfigOverrides {
        ConfigOverrides {
            port: self.port,
            host: self.host,
            downloads_dir: self.downloads_dir,
            www_root: self.www_root,
            ytdlp_bin: self.ytdlp_bin,
            env_path: self.env_file,
        }
    }
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/HOST")
}

/// Shared state injected into every handler. Nothing in here is mutated after
/// startup; the downloads directory on disk is the only shared resource.
#[derive(Clone)]
struct AppState {
    tool: Arc<dyn MediaTool>,
    downloads: Arc<DownloadsDir>,
    www_root: Arc<PathBuf>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
    details: Option<String>,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            details: None,
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            details: None,
        }
    }

    fn internal(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            details: Some(details.into()),
        }
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        let details = err.detail();
        match err {
            FetchError::Validation(message) => Self::bad_request(message),
            FetchError::Extraction(_) => Self::internal("failed to fetch video info", details),
            FetchError::Download(_) => Self::internal("download failed", details),
            FetchError::MalformedResponse(_) => {
                Self::internal("unexpected response from extractor", details)
            }
            FetchError::Io(_) => Self::internal("filesystem error", details),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.details {
            Some(details) => serde_json::json!({ "error": self.message, "details": details }),
            None => serde_json::json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
struct UrlQuery {
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct FormatsResponse {
    formats: Vec<FormatSummary>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = resolve_server_config(BackendArgs::parse().into_overrides())?;
    let host = parse_host_arg(&config.host)?;

    let downloads = DownloadsDir::prepare(&config.downloads_dir)
        .await
        .with_context(|| format!("preparing {}", config.downloads_dir.display()))?;

    let tool = YtDlp::new(&config.ytdlp_bin);
    match tool.version().await {
        Ok(version) => info!(binary = %tool.binary().display(), %version, "found yt-dlp"),
        Err(err) => warn!(binary = %tool.binary().display(), "yt-dlp is not usable: {err}"),
    }

    let state = AppState {
        tool: Arc::new(tool),
        downloads: Arc::new(downloads),
        www_root: Arc::new(config.www_root.clone()),
    };
    let app = build_router(state);

    let addr = SocketAddr::new(host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!(
        downloads = %config.downloads_dir.display(),
        www = %config.www_root.display(),
        "API server listening on http://{}",
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/video-info", get(video_info))
        .route("/api/download", post(download))
        .route("/api/formats", get(formats))
        .route("/downloads/{file}", get(serve_download))
        .fallback(static_fallback)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", err);
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "message": "Video downloader API is running",
    }))
}

async fn video_info(
    State(state): State<AppState>,
    Query(query): Query<UrlQuery>,
) -> ApiResult<Json<VideoInfo>> {
    let url = require_url(query.url.as_deref())?;
    let info = state.video_info(url).await.inspect_err(|err| {
        error!(url, "error fetching video info: {err}");
    })?;
    Ok(Json(info))
}

async fn download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> ApiResult<Json<DownloadResult>> {
    let Json(request) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let url = require_url(request.url.as_deref())?;
    let result = state
        .download(url, request.quality.as_deref(), request.format.as_deref())
        .await
        .inspect_err(|err| {
            error!(url, "error downloading video: {err}");
        })?;
    Ok(Json(result))
}

async fn formats(
    State(state): State<AppState>,
    Query(query): Query<UrlQuery>,
) -> ApiResult<Json<FormatsResponse>> {
    let url = require_url(query.url.as_deref())?;
    let raw = state.tool.fetch_info(url).await.inspect_err(|err| {
        error!(url, "error fetching formats: {err}");
    })?;
    Ok(Json(FormatsResponse {
        formats: format_summaries(&raw),
    }))
}

async fn serve_download(
    State(state): State<AppState>,
    AxumPath(file): AxumPath<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let path = state
        .downloads
        .resolve(&file)
        .ok_or_else(|| ApiError::not_found("file not found"))?;
    stream_file(path, Some(&headers)).await
}

async fn static_fallback(State(state): State<AppState>, req: Request<Body>) -> Response {
    let path = req.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::not_found("endpoint not found").into_response();
    }

    match serve_www_path(&state.www_root, path).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

impl AppState {
    async fn video_info(&self, url: &str) -> FetchResult<VideoInfo> {
        let raw = self.tool.fetch_info(url).await?;
        VideoInfo::try_from(&raw)
    }

    /// Fetches the title, downloads into `<title>_<millis>.<ext>`, and checks
    /// the file really landed on disk before reporting success.
    async fn download(
        &self,
        url: &str,
        quality: Option<&str>,
        format: Option<&str>,
    ) -> FetchResult<DownloadResult> {
        let ext = requested_extension(format)?;
        let raw = self.tool.fetch_info(url).await?;
        let title = raw
            .title()
            .ok_or_else(|| FetchError::MalformedResponse("missing video title".into()))?;

        let filename = download_filename(title, Utc::now().timestamp_millis(), &ext);
        let output = self.downloads.path_for(&filename);
        let plan = DownloadPlan::build(quality, &ext);

        if let Err(err) = self.tool.download(url, &plan, &output).await {
            self.downloads.remove_partial(&filename).await;
            return Err(err);
        }

        let size = self.downloads.stat(&filename).await.ok_or_else(|| {
            FetchError::Download("download completed but file not found".into())
        })?;

        info!(url, %filename, size, "download stored");
        Ok(DownloadResult {
            success: true,
            download_url: DownloadsDir::public_url(&filename),
            filename,
            size,
        })
    }
}

fn require_url(url: Option<&str>) -> FetchResult<&str> {
    let url = url
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| FetchError::Validation("url is required".into()))?;
    if url.starts_with('-') {
        return Err(FetchError::Validation("url must not start with '-'".into()));
    }
    Ok(url)
}

fn requested_extension(format: Option<&str>) -> FetchResult<String> {
    let ext = format
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_EXTENSION)
        .to_ascii_lowercase();
    if !is_valid_extension(&ext) {
        return Err(FetchError::Validation(format!("unsupported format: {ext}")));
    }
    Ok(ext)
}

async fn serve_www_path(root: &Path, request_path: &str) -> ApiResult<Response> {
    let target = resolve_www_path(root, request_path)?;
    let metadata = tokio::fs::metadata(&target).await;

    match metadata {
        Ok(meta) if meta.is_dir() => stream_file(root.join("index.html"), None).await,
        Ok(_) => stream_file(target, None).await,
        Err(_) => {
            if should_fallback_to_index(request_path) {
                stream_file(root.join("index.html"), None).await
            } else {
                Err(ApiError::not_found("file not found"))
            }
        }
    }
}

fn resolve_www_path(root: &Path, request_path: &str) -> ApiResult<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(root.join("index.html"));
    }
    let candidate = Path::new(trimmed);
    if candidate
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(root.join(candidate))
}

fn should_fallback_to_index(request_path: &str) -> bool {
    let trimmed = request_path.trim_start_matches('/');
    trimmed.is_empty() || Path::new(trimmed).extension().is_none()
}

async fn stream_file(path: PathBuf, headers: Option<&HeaderMap>) -> ApiResult<Response> {
    let mut file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let metadata = file
        .metadata()
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    if !metadata.is_file() {
        return Err(ApiError::not_found("file not found"));
    }
    let size = metadata.len();

    let guessed = MimeGuess::from_path(&path).first();
    let range = headers
        .and_then(|headers| headers.get(header::RANGE))
        .and_then(|value| parse_range_header(value, size));

    let mut response = match range {
        Some((start, _)) if start >= size => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            response
        }
        Some((start, end)) => {
            let end = end.min(size.saturating_sub(1));
            let length = end - start + 1;
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|_| ApiError::not_found("file not found"))?;
            let body = Body::from_stream(ReaderStream::new(file.take(length)));
            let mut response = body.into_response();
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            if let Ok(value) = HeaderValue::from_str(&format!("bytes {start}-{end}/{size}")) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            response
        }
        None => {
            let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(size));
            response
        }
    };

    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(mime) = guessed
        && let Ok(value) = HeaderValue::from_str(mime.as_ref())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }

    Ok(response)
}

fn parse_range_header(value: &HeaderValue, size: u64) -> Option<(u64, u64)> {
    let value = value.to_str().ok()?.trim();
    let range = value.strip_prefix("bytes=")?.trim();
    if range.is_empty() || range.contains(',') {
        return None;
    }
    let (start_str, end_str) = range.split_once('-')?;

    if start_str.is_empty() {
        // "-N" means the last N bytes.
        let suffix_len: u64 = end_str.parse().ok()?;
        if suffix_len == 0 {
            return None;
        }
        if suffix_len >= size {
            return Some((0, size.saturating_sub(1)));
        }
        return Some((size - suffix_len, size.saturating_sub(1)));
    }

    let start: u64 = start_str.parse().ok()?;
    let end = if end_str.is_empty() {
        size.saturating_sub(1)
    } else {
        end_str.parse().ok()?
    };
    if end < start {
        return None;
    }
    Some((start, end))
}
