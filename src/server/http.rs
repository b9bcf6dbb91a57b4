//! HTTP route handlers.
//!
//! All handlers are thin: they delegate to the engine, the registry or the
//! dependency service. The RPC paths mirror the canonical operation names.

use std::net::SocketAddr;

use axum::extract::State;
use axum::routing::{any, post};
use axum::{Json, Router};
use log::info;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::Settings;
use crate::error::LangkitError;
use crate::task::{ProcessingRequest, ProcessingStatus};
use crate::Result;

use super::ws::ws_handler;
use super::AppState;

/// Build the RPC router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/rpc/Processing.SendProcessingRequest",
            post(send_processing_request),
        )
        .route("/rpc/Processing.CancelProcessing", post(cancel_processing))
        .route(
            "/rpc/Processing.GetProcessingStatus",
            post(get_processing_status),
        )
        .route(
            "/rpc/Dependency.CheckDockerAvailability",
            post(check_docker),
        )
        .route(
            "/rpc/Dependency.CheckFFmpegAvailability",
            post(check_ffmpeg),
        )
        .route(
            "/rpc/Dependency.CheckMediaInfoAvailability",
            post(check_mediainfo),
        )
        .route(
            "/rpc/Dependency.CheckInternetConnectivity",
            post(check_internet),
        )
        .route("/rpc/Dependency.DownloadFFmpeg", post(download_ffmpeg))
        .route("/rpc/Dependency.DownloadMediaInfo", post(download_mediainfo))
        .route(
            "/rpc/Logging.SetEventThrottling",
            post(set_event_throttling),
        )
        .route(
            "/rpc/Logging.GetEventThrottlingStatus",
            post(get_event_throttling_status),
        )
        .route("/rpc/Settings.GetSettings", post(get_settings))
        .route("/rpc/Settings.SaveSettings", post(save_settings))
        .route("/rpc/Providers.GetModelCatalog", post(get_model_catalog))
        .route("/ws", any(ws_handler))
        .with_state(state)
}

/// Bind to loopback and serve until `shutdown` resolves.
pub async fn serve(
    state: AppState,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| LangkitError::config(format!("cannot bind {}: {}", addr, e)))?;
    info!("listening on http://{}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| LangkitError::config(format!("server error: {}", e)))?;
    Ok(())
}

async fn send_processing_request(
    State(state): State<AppState>,
    Json(request): Json<ProcessingRequest>,
) -> Json<ProcessingStatus> {
    Json(state.engine.send_processing_request(request))
}

async fn cancel_processing(State(state): State<AppState>) -> Json<Value> {
    state.engine.cancel_processing();
    Json(Value::Null)
}

async fn get_processing_status(State(state): State<AppState>) -> Json<ProcessingStatus> {
    Json(state.engine.get_processing_status())
}

async fn check_docker(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.dependency.check_docker().await))
}

async fn check_ffmpeg(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.dependency.check_ffmpeg().await))
}

async fn check_mediainfo(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.dependency.check_mediainfo().await))
}

async fn check_internet(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.dependency.check_internet().await))
}

async fn download_ffmpeg(State(state): State<AppState>) -> Json<Value> {
    match state.dependency.download_ffmpeg().await {
        Ok(path) => Json(json!({ "installed": path })),
        Err(e) => Json(json!({ "error": e.to_string() })),
    }
}

async fn download_mediainfo(State(state): State<AppState>) -> Json<Value> {
    match state.dependency.download_mediainfo().await {
        Ok(path) => Json(json!({ "installed": path })),
        Err(e) => Json(json!({ "error": e.to_string() })),
    }
}

#[derive(Deserialize)]
struct ThrottlingRequest {
    enabled: bool,
}

async fn set_event_throttling(
    State(state): State<AppState>,
    Json(request): Json<ThrottlingRequest>,
) -> Json<Value> {
    state.throttler.set_enabled(request.enabled);
    Json(Value::Null)
}

async fn get_event_throttling_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.throttler.status()))
}

async fn get_settings(State(state): State<AppState>) -> Json<Value> {
    match state.config.get_settings() {
        Ok(settings) => Json(json!(settings)),
        Err(e) => Json(json!({ "error": e.to_string() })),
    }
}

/// Persist settings, refresh the credential store, then invalidate provider
/// handles so the next lookup sees the new keys.
async fn save_settings(
    State(state): State<AppState>,
    Json(settings): Json<Settings>,
) -> Json<Value> {
    if let Err(e) = state.config.save_settings(&settings) {
        return Json(json!({ "error": e.to_string() }));
    }
    state.registry.credentials().refresh_from(&settings.api_keys);
    state.registry.update_factory();
    Json(Value::Null)
}

async fn get_model_catalog(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.registry.model_catalog()))
}
