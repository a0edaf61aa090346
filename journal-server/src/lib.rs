//! Collaboration backend for the E2EE journal sync core.
//!
//! Split into a library and a thin binary so integration tests can build an
//! in-process router without going through `main`.

pub mod asset_store;
pub mod audit_log;
pub mod auth;
pub mod db;
pub mod document_store;
pub mod error;
pub mod rate_limiter;
pub mod routes;
pub mod state;
pub mod ws_gateway;

use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use state::{AppConfig, AppState};

pub struct ServerConfig {
    pub jwt_secret: String,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_days: i64,
    pub rate_limit_window_seconds: u64,
    pub rate_limit_max_connections: usize,
    pub cors_origin: Option<String>,
}

pub async fn build_state(pool: sqlx::SqlitePool, config: &ServerConfig) -> AppState {
    state::build_state(
        pool,
        AppConfig {
            jwt_secret: config.jwt_secret.clone(),
            access_ttl_s: config.access_ttl_seconds,
            refresh_ttl_days: config.refresh_ttl_days,
            rate_limit_window: Duration::from_secs(config.rate_limit_window_seconds),
            rate_limit_max_connections: config.rate_limit_max_connections,
        },
    )
}

/// Builds the full application router: REST endpoints, the document
/// WebSocket route, request tracing, and (when configured) CORS.
///
/// Returns an error string rather than exiting, so tests can assert on a
/// misconfigured CORS origin instead of killing the test process.
pub fn build_router(app_state: AppState, cors_origin: Option<String>) -> Result<Router, String> {
    let api = Router::new()
        .route("/api/status", get(routes::status))
        .route("/api/auth/register", post(routes::register))
        .route("/api/auth/login", post(routes::login))
        .route("/api/auth/refresh", post(routes::refresh))
        .route("/api/auth/logout", post(routes::logout))
        .route("/api/auth/me", get(routes::me))
        .route("/api/documents/manifest", get(routes::manifest))
        .route("/api/assets/upload", post(routes::upload_asset))
        .route("/api/assets/:id", get(routes::get_asset).delete(routes::delete_asset))
        .route("/api/assets/:id/metadata", get(routes::get_asset_metadata));

    let ws = Router::new().route("/", get(ws_gateway::upgrade));

    let mut app = Router::new().merge(api).merge(ws).layer(TraceLayer::new_for_http()).with_state(app_state);

    if let Some(origin) = cors_origin {
        let header_value = origin.parse::<axum::http::HeaderValue>().map_err(|e| format!("invalid cors origin {origin:?}: {e}"))?;
        app = app.layer(CorsLayer::new().allow_origin(header_value).allow_methods(tower_http::cors::Any));
    }

    Ok(app)
}
