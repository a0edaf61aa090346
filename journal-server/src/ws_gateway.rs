//! Document WebSocket gateway.
//!
//! Mirrors `journal_core::sync_client::SyncClient`'s wire contract exactly:
//! clients connect to `/?document={uuid}&token={token}&sessionId={id}&displayName={name}`,
//! send and receive raw binary Yjs update frames, and expect a 401/403 at
//! the handshake (not a close frame) when the token is rejected.

use std::net::SocketAddr;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use uuid::Uuid;
use yrs::{ReadTxn, StateVector, Transact};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    document: String,
    token: String,
    #[serde(rename = "sessionId")]
    session_id: String,
    #[serde(rename = "displayName", default)]
    display_name: String,
}

pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let user_id = match state.auth.verify_access_token(&params.token) {
        Ok(id) => id,
        Err(_) => return StatusCode::UNAUTHORIZED.into_response(),
    };

    let document_uuid = match Uuid::parse_str(&params.document) {
        Ok(id) => id,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    let rate_key = user_id.to_string();
    if !state.rate_limiter.check(&rate_key) {
        tracing::warn!(%user_id, %addr, "rate limit exceeded for document connection");
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    if let Ok(Some(owner)) = state.documents.owner_of(document_uuid).await {
        if owner != user_id {
            state
                .audit
                .record(Some(user_id), "ws_access_denied", Some(document_uuid), None, now_ms())
                .await;
            return StatusCode::FORBIDDEN.into_response();
        }
    }

    ws.on_upgrade(move |socket| {
        handle_socket(socket, state, user_id, document_uuid, params.session_id, params.display_name)
    })
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

async fn handle_socket(
    mut socket: WebSocket,
    state: AppState,
    user_id: Uuid,
    document_uuid: Uuid,
    session_id: String,
    display_name: String,
) {
    let existing_state = match state.documents.get_for_user(document_uuid, user_id).await {
        Ok(bytes) => bytes,
        Err(_) => {
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let runtime = match state.registry.get_or_create(document_uuid, existing_state.as_deref()).await {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(%err, %document_uuid, "failed to hydrate document runtime");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let now = now_ms();
    sqlx_insert_session(&state, user_id, document_uuid, &session_id, &display_name, now).await;
    state
        .audit
        .record(Some(user_id), "ws_connect", Some(document_uuid), Some(&session_id), now)
        .await;

    let full_state = {
        let txn = runtime.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    };
    if socket.send(Message::Binary(full_state)).await.is_err() {
        return;
    }

    let mut updates_rx = runtime.updates.subscribe();

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Binary(bytes))) => {
                        if let Err(err) = apply_and_persist(&state, &runtime, document_uuid, user_id, &session_id, &bytes).await {
                            tracing::warn!(%err, %document_uuid, "rejecting update");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            broadcast = updates_rx.recv() => {
                match broadcast {
                    Ok(bytes) => {
                        if socket.send(Message::Binary(bytes)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    state
        .audit
        .record(Some(user_id), "ws_disconnect", Some(document_uuid), Some(&session_id), now_ms())
        .await;
    mark_session_disconnected(&state, &session_id).await;
}

async fn apply_and_persist(
    state: &AppState,
    runtime: &crate::state::DocumentRuntime,
    document_uuid: Uuid,
    user_id: Uuid,
    session_id: &str,
    update: &[u8],
) -> Result<(), String> {
    if state.documents.owner_of(document_uuid).await.ok().flatten().is_some_and(|owner| owner != user_id) {
        return Err("ownership check failed after connect".into());
    }

    let parsed = yrs::Update::decode_v1(update).map_err(|e| e.to_string())?;
    {
        let mut txn = runtime.doc.transact_mut();
        txn.apply_update(parsed).map_err(|e| e.to_string())?;
    }

    let _ = runtime.updates.send(update.to_vec());

    let full_state = {
        let txn = runtime.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    };
    state
        .documents
        .upsert(document_uuid, user_id, &full_state, session_id, now_ms())
        .await
        .map_err(|e| e.to_string())?;

    Ok(())
}

async fn sqlx_insert_session(
    state: &AppState,
    user_id: Uuid,
    document_uuid: Uuid,
    session_id: &str,
    display_name: &str,
    now: i64,
) {
    let _ = sqlx::query(
        "INSERT INTO sessions (id, user_id, document_uuid, session_id, display_name, connected_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id.to_string())
    .bind(document_uuid.to_string())
    .bind(session_id)
    .bind(display_name)
    .bind(now)
    .execute(&state.pool)
    .await;
}

async fn mark_session_disconnected(state: &AppState, session_id: &str) {
    let _ = sqlx::query("UPDATE sessions SET disconnected_at = ? WHERE session_id = ? AND disconnected_at IS NULL")
        .bind(now_ms())
        .bind(session_id)
        .execute(&state.pool)
        .await;
}
