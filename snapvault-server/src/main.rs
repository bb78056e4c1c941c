mod auth;
mod config;
mod handlers;
mod routes;
mod state;
mod store;
mod supervisor;
mod validation;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use state::AppState;
use store::{BackupStore, S3ObjectStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    info!("snapvault-server starting");

    let config = Config::from_env();
    if config.bucket.is_none() {
        warn!("BACKUP_S3_BUCKET is not set; backup operations will fail until it is configured");
    }
    if config.session_secret.is_none() {
        warn!("SESSION_SECRET is not set; authenticated routes will fail until it is configured");
    }
    if config.oauth.is_none() {
        warn!("OAuth provider is not fully configured; sign-in is disabled");
    }

    let timeout = Duration::from_secs(config.http_timeout_secs);

    // Constructed once; every request shares this client by reference.
    let s3 = build_s3_client(&config, timeout).await;
    info!(region = %config.region, "Object store client ready");

    let http = reqwest::Client::builder().timeout(timeout).build()?;

    let port = config.port;
    let state = Arc::new(AppState::new(
        config,
        BackupStore::new(Arc::new(S3ObjectStore::new(s3))),
        http,
    ));

    let app = routes::build_router(Arc::clone(&state))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(port = port, "Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn build_s3_client(config: &Config, timeout: Duration) -> aws_sdk_s3::Client {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .timeout_config(
            TimeoutConfig::builder()
                .operation_timeout(timeout)
                .build(),
        );
    if let Some(endpoint) = &config.s3_endpoint {
        loader = loader.endpoint_url(endpoint);
    }

    let shared = loader.load().await;
    let mut builder = aws_sdk_s3::config::Builder::from(&shared);
    if config.s3_force_path_style {
        builder = builder.force_path_style(true);
    }
    aws_sdk_s3::Client::from_conf(builder.build())
}

/// The API contract is JSON everywhere; a panicking handler must not leak
/// an unstructured failure to the caller.
fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> axum::http::Response<axum::body::Body> {
    let detail = err
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| err.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string());
    tracing::error!(panic = %detail, "Request handler panicked");

    let body = serde_json::json!({
        "error": "An unexpected error occurred while processing the request."
    });
    axum::http::Response::builder()
        .status(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}
