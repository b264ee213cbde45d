//! HTTP control surface for the edge daemon
//!
//! Exposes stream control, the motion hook, health, queue inspection,
//! config management and the live playlist over one local port.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use lookout_config::Config;

use crate::daemon::SharedConfig;
use crate::extractor::ClipExtractor;
use crate::paths::{self, StoragePaths};
use crate::queue::UploadQueue;
use crate::segments::SegmentStore;
use crate::source::CaptureSource;
use crate::status::{self, StatusSnapshot};
use crate::stream::{StreamError, StreamSupervisor};

/// Errors that can occur when running the control server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid bind address: {0}")]
    Addr(#[from] std::net::AddrParseError),
    #[error("failed to serve control surface: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared handles for the request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: SharedConfig,
    /// Where config updates are persisted; `None` keeps them in memory.
    pub config_path: Option<PathBuf>,
    pub supervisor: Arc<StreamSupervisor>,
    pub extractor: Arc<ClipExtractor>,
    pub queue: UploadQueue,
    pub paths: StoragePaths,
    pub buffer: SegmentStore,
    pub live: SegmentStore,
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MotionRequest {
    #[serde(default)]
    before: Option<u64>,
    #[serde(default)]
    after: Option<u64>,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn ok_message(message: &str) -> Response {
    Json(json!({ "status": "ok", "message": message })).into_response()
}

/// Handler for POST /start
async fn start_stream(State(state): State<AppState>, body: Option<Json<StartRequest>>) -> Response {
    let Some(Json(request)) = body else {
        return error_response(StatusCode::BAD_REQUEST, "invalid request body");
    };

    let source = match CaptureSource::parse(&request.kind, request.value.as_deref()) {
        Ok(source) => source,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    match state.supervisor.start(source).await {
        Ok(()) => ok_message("Stream started"),
        Err(e @ StreamError::AlreadyRunning) => {
            error_response(StatusCode::CONFLICT, &e.to_string())
        }
        Err(StreamError::InvalidSource(e)) => {
            error_response(StatusCode::BAD_REQUEST, &e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

/// Handler for POST /stop
async fn stop_stream(State(state): State<AppState>) -> Response {
    match state.supervisor.stop().await {
        Ok(()) => ok_message("Stream stopped"),
        Err(e @ StreamError::NotRunning) => error_response(StatusCode::CONFLICT, &e.to_string()),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

/// Handler for POST /motion
///
/// Fires the extractor; an empty body uses the configured clip window.
/// Always answers ok, with `saved` telling whether a clip came out.
async fn motion(State(state): State<AppState>, body: Option<Json<MotionRequest>>) -> Response {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let (before, after) = {
        let cfg = state.config.read().await;
        (
            request.before.unwrap_or(cfg.clip.before_seconds),
            request.after.unwrap_or(cfg.clip.after_seconds),
        )
    };

    let clip = state.extractor.extract(before, after).await;
    let file = clip.as_ref().and_then(|c| {
        c.video_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
    });

    Json(json!({
        "status": "ok",
        "saved": clip.is_some(),
        "file": file,
    }))
    .into_response()
}

/// Handler for GET /health
async fn health(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(
        status::collect_status(
            &state.supervisor,
            &state.buffer,
            &state.live,
            &state.queue,
            &state.paths,
        )
        .await,
    )
}

/// Handler for GET /queue
async fn queue_tasks(State(state): State<AppState>) -> Response {
    match state.queue.tasks().await {
        Ok(tasks) => Json(tasks).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

/// Handler for GET /config
async fn get_config(State(state): State<AppState>) -> Json<Config> {
    Json(state.config.read().await.clone())
}

/// Handler for POST /config
///
/// Replaces the runtime config and persists it. Settings the running
/// components read per tick apply immediately; bind addresses and
/// storage paths need a restart.
async fn update_config(State(state): State<AppState>, body: Option<Json<Config>>) -> Response {
    let Some(Json(new_config)) = body else {
        return error_response(StatusCode::BAD_REQUEST, "invalid config body");
    };

    if let Some(path) = &state.config_path {
        if let Err(e) = new_config.save(path) {
            warn!(error = %e, "failed to persist config update");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
        }
    }
    *state.config.write().await = new_config;
    info!("config updated");
    ok_message("Config updated")
}

/// Handler for DELETE /clear-all
///
/// Wipes buffered segments, the live playlist, saved clips and the
/// upload log. A running stream keeps writing fresh segments afterward.
async fn clear_all(State(state): State<AppState>) -> Response {
    let mut first_error: Option<String> = None;
    for dir in [
        state.paths.events_dir(),
        state.paths.buffer_dir(),
        state.paths.live_dir(),
    ] {
        if let Err(e) = paths::clear_directory(&dir) {
            warn!(dir = %dir.display(), error = %e, "failed to clear directory");
            first_error.get_or_insert(e.to_string());
        }
    }
    if let Err(e) = state.queue.clear().await {
        warn!(error = %e, "failed to clear upload log");
        first_error.get_or_insert(e.to_string());
    }

    match first_error {
        None => ok_message("All local data cleared"),
        Some(message) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &message),
    }
}

/// Handler for GET /live/:file
///
/// Serves the playlist and its segments straight from the live
/// directory. Only bare file names are accepted, so the handler cannot
/// be walked out of that directory.
async fn live_asset(State(state): State<AppState>, UrlPath(file): UrlPath<String>) -> Response {
    if file.is_empty() || file.contains("..") || file.contains('/') || file.contains('\\') {
        return error_response(StatusCode::NOT_FOUND, "not found");
    }

    let path = state.paths.live_dir().join(&file);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(_) => return error_response(StatusCode::NOT_FOUND, "not found"),
    };

    let content_type = match path.extension().and_then(|e| e.to_str()) {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("ts") => "video/mp2t",
        _ => "application/octet-stream",
    };

    // Players poll the playlist; a cached copy would freeze the stream.
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(bytes))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Creates the axum Router with all control endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/start", post(start_stream))
        .route("/stop", post(stop_stream))
        .route("/motion", post(motion))
        .route("/health", get(health))
        .route("/queue", get(queue_tasks))
        .route("/config", get(get_config).post(update_config))
        .route("/clear-all", delete(clear_all))
        .route("/live/:file", get(live_asset))
        .with_state(state)
}

/// Runs the control server on the configured bind address.
pub async fn run_server(state: AppState) -> Result<(), ServerError> {
    let bind = state.config.read().await.server.bind.clone();
    let addr: SocketAddr = bind.parse()?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "control server listening");
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}
