use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

const SESSION_EXPIRY_HOURS: i64 = 24;

pub const SESSION_COOKIE: &str = "snapvault_session";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String, // operator id
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

/// Issue a new session token for a signed-in operator.
pub fn issue_session(secret: &str, operator_id: &str) -> anyhow::Result<(String, i64)> {
    let now = Utc::now();
    let exp = now + Duration::hours(SESSION_EXPIRY_HOURS);
    let claims = SessionClaims {
        sub: operator_id.to_string(),
        exp: exp.timestamp(),
        iat: now.timestamp(),
        jti: uuid::Uuid::new_v4().to_string(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok((token, exp.timestamp()))
}

/// Validate a session token and return its claims.
pub fn validate_session(
    secret: &str,
    token: &str,
) -> Result<SessionClaims, jsonwebtoken::errors::Error> {
    let token_data = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

pub fn session_cookie(token: &str) -> String {
    format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_EXPIRY_HOURS * 3600
    )
}

pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// Extract and validate the session from a request's Cookie header.
pub fn session_from_headers(headers: &HeaderMap, secret: &str) -> Option<SessionClaims> {
    let token = cookie_value(headers, SESSION_COOKIE)?;
    validate_session(secret, token).ok()
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';')
        .map(str::trim)
        .find_map(|pair| pair.strip_prefix(name).and_then(|rest| rest.strip_prefix('=')))
}

/// Axum middleware guarding everything behind the operator session.
///
/// API calls get a JSON 401; page navigation is redirected to the sign-in
/// flow with the original target preserved.
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let is_api = req.uri().path().starts_with("/api/");

    let Some(secret) = state.config.session_secret.as_deref() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            axum::Json(serde_json::json!({ "error": "Session secret not configured on server." })),
        )
            .into_response();
    };

    match session_from_headers(req.headers(), secret) {
        Some(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        None if is_api => (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({ "error": "Unauthorized" })),
        )
            .into_response(),
        None => {
            let target = req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            let location = format!("/auth/signin?callbackUrl={}", urlencoding::encode(target));
            Response::builder()
                .status(StatusCode::FOUND)
                .header(header::LOCATION, location)
                .body(Body::empty())
                .unwrap()
        }
    }
}
