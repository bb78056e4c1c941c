use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::error;

use crate::state::AppState;
use crate::store::StoreError;
use crate::validation::{is_valid_backup_url, validate_key};

const BUCKET_NOT_CONFIGURED: &str = "S3 bucket not configured on server.";

fn error_json(message: &str) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

fn not_found_response(key: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(error_json(&format!("Backup file not found: {key}"))),
    )
        .into_response()
}

#[derive(Deserialize, Default)]
pub struct KeyQuery {
    pub key: Option<String>,
}

/// Validates store configuration plus the caller-supplied key, producing
/// either the verified (bucket, key) pair or a finished error response.
/// Never partially valid; no network calls happen past a failure here.
fn validate_key_request(
    state: &AppState,
    key: Option<String>,
) -> Result<(String, String), Response> {
    let Some(bucket) = state.config.bucket.clone() else {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(error_json(BUCKET_NOT_CONFIGURED)),
        )
            .into_response());
    };

    let Some(key) = key else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(error_json("Missing required 'key' query parameter.")),
        )
            .into_response());
    };

    if let Err(rejection) = validate_key(&key, &state.config.prefix) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(error_json(&rejection.to_string())),
        )
            .into_response());
    }

    Ok((bucket, key))
}

// ── GET /api/backups/list ──

pub async fn list(State(state): State<Arc<AppState>>) -> Response {
    let Some(bucket) = state.config.bucket.as_deref() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(error_json(BUCKET_NOT_CONFIGURED)),
        )
            .into_response();
    };

    match state
        .backups
        .list(bucket, &state.config.prefix, state.config.list_max_keys)
        .await
    {
        Ok(files) => (StatusCode::OK, Json(serde_json::json!({ "files": files }))).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list backups");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_json(&format!("Failed to list backups from S3: {e}"))),
            )
                .into_response()
        }
    }
}

// ── POST /api/backups/create ──

/// Upstream contract of the backup-trigger service.
#[derive(Debug, Deserialize)]
struct TriggerResponse {
    #[serde(default)]
    success: bool,
    url: Option<String>,
    stats: Option<serde_json::Value>,
}

/// An application-level failure in a 2xx reply still means the backup
/// failed.
fn trigger_outcome(body: &TriggerResponse) -> (StatusCode, serde_json::Value) {
    if body.success {
        let mut payload =
            serde_json::json!({ "message": "Backup created successfully and uploaded to S3." });
        if let Some(url) = &body.url {
            payload["url"] = serde_json::json!(url);
        }
        if let Some(stats) = &body.stats {
            payload["stats"] = stats.clone();
        }
        (StatusCode::OK, payload)
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_json("Backup completed but reported failure."),
        )
    }
}

pub async fn create(State(state): State<Arc<AppState>>) -> Response {
    let endpoint = format!("{}/backup", state.config.backup_api_url.trim_end_matches('/'));
    if !is_valid_backup_url(&endpoint) {
        error!(url = %endpoint, "Backup service URL rejected by the loopback allow-list");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(error_json("Backup service URL is not allowed.")),
        )
            .into_response();
    }

    let mut request = state
        .http
        .post(&endpoint)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(api_key) = &state.config.backup_api_key {
        request = request.bearer_auth(api_key);
    }

    let resp = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "Failed to reach backup service");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_json(&format!(
                    "Failed to connect to backup service: {e}"
                ))),
            )
                .into_response();
        }
    };

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        error!(status = %status, body = %text, "Backup service returned an error");
        let detail = if text.is_empty() {
            "Unknown error".to_string()
        } else {
            text
        };
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(error_json(&format!("Backup failed: {detail}"))),
        )
            .into_response();
    }

    let body: TriggerResponse = match resp.json().await {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "Backup service returned an unreadable body");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_json(&format!(
                    "Failed to connect to backup service: {e}"
                ))),
            )
                .into_response();
        }
    };

    let (status, payload) = trigger_outcome(&body);
    (status, Json(payload)).into_response()
}

// ── GET /api/backups/download?key= ──

pub async fn download(
    State(state): State<Arc<AppState>>,
    Query(query): Query<KeyQuery>,
) -> Response {
    let (bucket, key) = match validate_key_request(&state, query.key) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    if let Err(e) = state.backups.check_exists(&bucket, &key).await {
        return match e {
            StoreError::NotFound(_) => not_found_response(&key),
            StoreError::Store(msg) => {
                error!(key = %key, error = %msg, "Existence probe failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(error_json(&format!("Failed to generate download URL: {msg}"))),
                )
                    .into_response()
            }
        };
    }

    let ttl = Duration::from_secs(state.config.presign_ttl_secs);
    match state.backups.download_url(&bucket, &key, ttl).await {
        // Redirect the browser straight at the store; bytes never pass
        // through this process.
        Ok(url) => Response::builder()
            .status(StatusCode::FOUND)
            .header(header::LOCATION, url)
            .body(Body::empty())
            .unwrap(),
        Err(StoreError::NotFound(_)) => not_found_response(&key),
        Err(StoreError::Store(msg)) => {
            error!(key = %key, error = %msg, "Failed to presign download");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_json(&format!("Failed to generate download URL: {msg}"))),
            )
                .into_response()
        }
    }
}

// ── DELETE /api/backups/delete?key= ──

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Query(query): Query<KeyQuery>,
) -> Response {
    let (bucket, key) = match validate_key_request(&state, query.key) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match state.backups.delete(&bucket, &key).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "message": format!("Backup '{key}' deleted successfully.")
            })),
        )
            .into_response(),
        Err(StoreError::NotFound(_)) => not_found_response(&key),
        Err(StoreError::Store(msg)) => {
            error!(key = %key, error = %msg, "Failed to delete backup");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_json("Failed to delete backup from S3.")),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_success_carries_url_and_stats() {
        let body = TriggerResponse {
            success: true,
            url: Some("https://bucket.s3.amazonaws.com/backups/x.tar.gz".to_string()),
            stats: Some(serde_json::json!({ "documents": 42 })),
        };
        let (status, payload) = trigger_outcome(&body);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            payload["message"],
            "Backup created successfully and uploaded to S3."
        );
        assert_eq!(payload["stats"]["documents"], 42);
        assert!(payload["url"].as_str().unwrap().contains("x.tar.gz"));
    }

    #[test]
    fn test_trigger_success_without_optional_fields() {
        let body = TriggerResponse {
            success: true,
            url: None,
            stats: None,
        };
        let (status, payload) = trigger_outcome(&body);
        assert_eq!(status, StatusCode::OK);
        assert!(payload.get("url").is_none());
        assert!(payload.get("stats").is_none());
    }

    #[test]
    fn test_trigger_reported_failure_is_500_even_on_2xx() {
        let body = TriggerResponse {
            success: false,
            url: None,
            stats: None,
        };
        let (status, payload) = trigger_outcome(&body);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(payload["error"], "Backup completed but reported failure.");
    }

    #[test]
    fn test_trigger_response_defaults_missing_success_to_failure() {
        let body: TriggerResponse = serde_json::from_str("{}").unwrap();
        let (status, _) = trigger_outcome(&body);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
