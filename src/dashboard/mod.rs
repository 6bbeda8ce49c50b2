//! HTTP API: Axum server over the area service.
//!
//! Serves area lookups, quota state and the usage dashboard as JSON.
//! CORS enabled for local development.

pub mod routes;
pub mod usage;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use routes::AppState;

/// Bind the port and serve in a background task.
///
/// Binding happens before returning, so a taken port is reported here
/// rather than inside the task.
pub async fn spawn_server(state: AppState, port: u16) -> Result<JoinHandle<()>> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API port {port}"))?;
    info!(port, "API server listening on http://localhost:{port}");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server error");
        }
    }))
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/areas/:key", get(routes::get_area))
        .route("/api/usage", get(routes::get_usage_dashboard))
        .route("/api/usage/:provider", get(routes::get_usage))
        .route("/api/quota/:provider", get(routes::get_quota))
        .route("/api/cache/evict", post(routes::evict_cache))
        .route("/api/stats", get(routes::get_stats))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
