use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use crate::state::AppState;
use crate::supervisor;

fn error_json(message: &str) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

// ── GET /api/bot/status ──

pub async fn bot_status(State(state): State<Arc<AppState>>) -> Response {
    if !supervisor::available() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(error_json(
                "Process supervisor is not available in this environment",
            )),
        )
            .into_response();
    }

    let name_filter = state.config.bot_process_name.clone();
    let reports = match tokio::task::spawn_blocking(move || supervisor::snapshot(&name_filter)).await
    {
        Ok(reports) => reports,
        Err(e) => {
            error!(error = %e, "Process snapshot task failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_json("Failed to get bot process status")),
            )
                .into_response();
        }
    };

    if reports.is_empty() {
        return (
            StatusCode::NOT_FOUND,
            Json(error_json("No bot process found")),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({ "processes": reports })),
    )
        .into_response()
}

// ── GET /api/health ──

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let elapsed = state.started_at.elapsed();
    let hours = elapsed.as_secs() / 3600;
    let minutes = (elapsed.as_secs() % 3600) / 60;

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime": format!("{}h {}m", hours, minutes),
        })),
    )
}
