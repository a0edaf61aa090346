//! Async integration tests against an in-process server, exercised over a
//! real TCP socket so the REST and WebSocket handlers run exactly as they
//! would in production.

use std::net::SocketAddr;

use journal_core::wire::{
    AuthResponse, LoginRequest, ManifestResponse, RegisterRequest, UserDto,
};
use journal_server::{build_router, build_state, db, ServerConfig};
use serde_json::json;

async fn spawn_server() -> (SocketAddr, reqwest::Client) {
    let pool = db::connect("sqlite::memory:").await.unwrap();
    let config = ServerConfig {
        jwt_secret: "integration-test-secret".into(),
        access_ttl_seconds: 900,
        refresh_ttl_days: 90,
        rate_limit_window_seconds: 60,
        rate_limit_max_connections: 30,
        cors_origin: None,
    };
    let state = build_state(pool, &config).await;
    let app = build_router(state, config.cors_origin).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await.unwrap();
    });

    (addr, reqwest::Client::new())
}

#[tokio::test]
async fn register_login_and_manifest_round_trip() {
    let (addr, client) = spawn_server().await;
    let base = format!("http://{addr}");

    let register: AuthResponse = client
        .post(format!("{base}/api/auth/register"))
        .json(&RegisterRequest { email: "alice@example.com".into(), password: "hunter2hunter".into(), uek: None })
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(register.user.email, "alice@example.com");

    let login: AuthResponse = client
        .post(format!("{base}/api/auth/login"))
        .json(&LoginRequest { email: "alice@example.com".into(), password: "hunter2hunter".into() })
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let me: UserDto = client
        .get(format!("{base}/api/auth/me"))
        .bearer_auth(&login.access_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me.id, register.user.id);

    let manifest: ManifestResponse = client
        .get(format!("{base}/api/documents/manifest"))
        .bearer_auth(&login.access_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(manifest.documents.is_empty());
}

#[tokio::test]
async fn duplicate_registration_returns_conflict() {
    let (addr, client) = spawn_server().await;
    let base = format!("http://{addr}");

    let body = json!({ "email": "bob@example.com", "password": "hunter2hunter" });
    let first = client.post(format!("{base}/api/auth/register")).json(&body).send().await.unwrap();
    assert_eq!(first.status(), reqwest::StatusCode::OK);

    let second = client.post(format!("{base}/api/auth/register")).json(&body).send().await.unwrap();
    assert_eq!(second.status(), reqwest::StatusCode::CONFLICT);
}

#[tokio::test]
async fn manifest_requires_bearer_token() {
    let (addr, client) = spawn_server().await;
    let base = format!("http://{addr}");

    let response = client.get(format!("{base}/api/documents/manifest")).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn status_endpoint_reports_ok() {
    let (addr, client) = spawn_server().await;
    let response = client.get(format!("http://{addr}/api/status")).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
}

/// Exercises the router directly (no socket) via `tower::ServiceExt::oneshot`,
/// for the plain request/response endpoints that don't need a live upgrade.
#[tokio::test]
async fn status_endpoint_oneshot_against_router() {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    let pool = db::connect("sqlite::memory:").await.unwrap();
    let config = ServerConfig {
        jwt_secret: "oneshot-test-secret".into(),
        access_ttl_seconds: 900,
        refresh_ttl_days: 90,
        rate_limit_window_seconds: 60,
        rate_limit_max_connections: 30,
        cors_origin: None,
    };
    let state = build_state(pool, &config).await;
    let app = build_router(state, config.cors_origin).unwrap();

    let response = app
        .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
}
