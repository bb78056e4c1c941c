use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{error, warn};

use crate::auth::session::{
    self, clear_session_cookie, session_cookie, session_from_headers,
};
use crate::handlers::{backups, status};
use crate::state::AppState;

/// Exact path → the one verb it serves. Checked before authentication so a
/// wrong-verb request never needs a valid session to be rejected.
const GATED_ROUTES: &[(&str, Method)] = &[
    ("/api/backups/list", Method::GET),
    ("/api/backups/create", Method::POST),
    ("/api/backups/download", Method::GET),
    ("/api/backups/delete", Method::DELETE),
    ("/api/bot/status", Method::GET),
    ("/api/health", Method::GET),
    ("/api/auth/session", Method::GET),
    ("/api/auth/signout", Method::POST),
    ("/auth/signin", Method::GET),
    ("/auth/callback", Method::GET),
];

pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/api/backups/list", get(backups::list))
        .route("/api/backups/create", post(backups::create))
        .route("/api/backups/download", get(backups::download))
        .route("/api/backups/delete", delete(backups::delete))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session::require_session,
        ));

    // Unauthenticated routes: the bot-status probe, health, and the sign-in
    // flow itself.
    let public = Router::new()
        .route("/api/bot/status", get(status::bot_status))
        .route("/api/health", get(status::health))
        .route("/api/auth/session", get(session_info))
        .route("/api/auth/signout", post(signout))
        .route("/auth/signin", get(signin))
        .route("/auth/callback", get(oauth_callback));

    // Dashboard assets; any page navigation without a session redirects to
    // sign-in.
    let pages = Router::new()
        .fallback_service(
            ServeDir::new("web/dist").fallback(ServeFile::new("web/dist/index.html")),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session::require_session,
        ));

    Router::new()
        .merge(public)
        .merge(api)
        .merge(pages)
        .layer(middleware::from_fn(method_gate))
        .with_state(state)
}

// ── Method gate ──

async fn method_gate(req: Request, next: Next) -> Response {
    let path = req.uri().path();
    if let Some((_, allowed)) = GATED_ROUTES.iter().find(|(gated, _)| *gated == path) {
        if req.method() != allowed {
            let mut resp = (
                StatusCode::METHOD_NOT_ALLOWED,
                Json(serde_json::json!({
                    "error": format!("Method Not Allowed. Use {allowed} to perform this action.")
                })),
            )
                .into_response();
            if let Ok(value) = HeaderValue::from_str(allowed.as_str()) {
                resp.headers_mut().insert(header::ALLOW, value);
            }
            return resp;
        }
    }
    next.run(req).await
}

// ── Auth handlers ──

fn error_json(message: &str) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

fn found(location: &str) -> Response {
    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, location)
        .body(Body::empty())
        .unwrap()
}

/// Only same-origin targets may round-trip through the sign-in flow.
fn safe_callback(target: Option<&str>) -> &str {
    target.filter(|t| t.starts_with('/')).unwrap_or("/")
}

#[derive(Deserialize)]
struct SigninQuery {
    #[serde(rename = "callbackUrl")]
    callback_url: Option<String>,
}

async fn signin(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SigninQuery>,
) -> Response {
    let Some(oauth) = &state.oauth else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(error_json("Sign-in is not configured on server.")),
        )
            .into_response();
    };

    let callback = safe_callback(query.callback_url.as_deref());
    found(&oauth.authorize_redirect(callback))
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let Some(oauth) = &state.oauth else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(error_json("Sign-in is not configured on server.")),
        )
            .into_response();
    };
    let Some(secret) = state.config.session_secret.as_deref() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(error_json("Session secret not configured on server.")),
        )
            .into_response();
    };

    if let Some(provider_error) = query.error {
        return (
            StatusCode::BAD_REQUEST,
            Json(error_json(&format!("Sign-in failed: {provider_error}"))),
        )
            .into_response();
    }
    let Some(code) = query.code else {
        return (
            StatusCode::BAD_REQUEST,
            Json(error_json("Missing required 'code' query parameter.")),
        )
            .into_response();
    };

    let access_token = match oauth.exchange_code(&code).await {
        Ok(token) => token,
        Err(e) => {
            error!(error = %e, "Authorization code exchange failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_json(&format!("Sign-in failed: {e}"))),
            )
                .into_response();
        }
    };

    let subject = match oauth.fetch_subject(&access_token).await {
        Ok(subject) => subject,
        Err(e) => {
            error!(error = %e, "Failed to fetch account identity");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_json(&format!("Sign-in failed: {e}"))),
            )
                .into_response();
        }
    };

    // Single-operator allow-list, enforced once at session establishment.
    // An unset allow-list blocks sign-in.
    if state.config.allowed_operator_id.as_deref() != Some(subject.as_str()) {
        warn!(subject = %subject, "Sign-in rejected: account not in operator allow-list");
        return (
            StatusCode::FORBIDDEN,
            Json(error_json(
                "Account is not authorized to access this dashboard.",
            )),
        )
            .into_response();
    }

    let (token, _expires_at) = match session::issue_session(secret, &subject) {
        Ok(issued) => issued,
        Err(e) => {
            error!(error = %e, "Failed to issue session token");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_json("Failed to establish session.")),
            )
                .into_response();
        }
    };

    let callback = safe_callback(query.state.as_deref()).to_string();
    let mut resp = found(&callback);
    if let Ok(value) = HeaderValue::from_str(&session_cookie(&token)) {
        resp.headers_mut().insert(header::SET_COOKIE, value);
    }
    resp
}

async fn signout() -> Response {
    let mut resp = (StatusCode::OK, Json(serde_json::json!({ "ok": true }))).into_response();
    if let Ok(value) = HeaderValue::from_str(&clear_session_cookie()) {
        resp.headers_mut().insert(header::SET_COOKIE, value);
    }
    resp
}

async fn session_info(
    State(state): State<Arc<AppState>>,
    req: Request,
) -> Response {
    let claims = state
        .config
        .session_secret
        .as_deref()
        .and_then(|secret| session_from_headers(req.headers(), secret));

    match claims {
        Some(claims) => Json(serde_json::json!({
            "authenticated": true,
            "operator_id": claims.sub,
            "expires_at": claims.exp,
        }))
        .into_response(),
        None => Json(serde_json::json!({ "authenticated": false })).into_response(),
    }
}
