//! Versioned HTTP plugin route groups (informational + downloads).

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use crate::server::AppState;

/// Version prefix for the plugin route groups.
pub const API_VERSION: &str = "v4";

/// Build the versioned plugin routers.
pub fn plugin_routes() -> Router<AppState> {
    let group = Router::new()
        .route("/info", get(info_handler))
        .route("/downloads/model", get(download_model_handler));
    Router::new().nest(&format!("/{API_VERSION}"), group)
}

/// Informational plugin: build and runtime facts.
async fn info_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let info = &state.info;
    Json(serde_json::json!({
        "name": "aria",
        "version": env!("CARGO_PKG_VERSION"),
        "mode": info.mode.as_str(),
        "locale": info.locale,
        "uptime_secs": info.started_at.elapsed().as_secs(),
    }))
}

/// Downloads plugin: stream the model artifact.
async fn download_model_handler(State(state): State<AppState>) -> Response {
    match tokio::fs::read(&state.info.model_path).await {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(
                path = %state.info.model_path.display(),
                error = %e,
                "model artifact unavailable for download"
            );
            (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({
                    "error": format!("model artifact unavailable: {e}"),
                })),
            )
                .into_response()
        }
    }
}
