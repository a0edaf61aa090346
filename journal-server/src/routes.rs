//! REST handlers: auth lifecycle, document manifest, and asset CRUD.

use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use journal_core::wire::{
    AssetEncryptionMeta, AssetUploadResponse, LoginRequest, LogoutRequest, ManifestResponse, RefreshRequest,
    RefreshResponse, RegisterRequest, StatusResponse, UserDto,
};

use crate::asset_store::NewAsset;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn bearer_user_id(state: &AppState, headers: &HeaderMap) -> ApiResult<Uuid> {
    let header = headers.get(header::AUTHORIZATION).ok_or(ApiError::InvalidAccessToken)?;
    let value = header.to_str().map_err(|_| ApiError::InvalidAccessToken)?;
    let token = value.strip_prefix("Bearer ").ok_or(ApiError::InvalidAccessToken)?;
    state.auth.verify_access_token(token)
}

pub async fn status() -> Json<StatusResponse> {
    Json(StatusResponse { ok: true, service: "journal-server".into() })
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<Json<journal_core::wire::AuthResponse>> {
    let response = state.auth.register(&req.email, &req.password, req.uek).await?;
    Ok(Json(response))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<journal_core::wire::AuthResponse>> {
    let response = state.auth.login(&req.email, &req.password).await?;
    Ok(Json(response))
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Json<RefreshResponse>> {
    let response = state.auth.refresh(&req.refresh_token).await?;
    Ok(Json(response))
}

pub async fn logout(
    State(state): State<AppState>,
    Json(req): Json<LogoutRequest>,
) -> ApiResult<StatusCode> {
    state.auth.logout(&req.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn me(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<UserDto>> {
    let user_id = bearer_user_id(&state, &headers)?;
    Ok(Json(state.auth.me(user_id).await?))
}

pub async fn manifest(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<ManifestResponse>> {
    let user_id = bearer_user_id(&state, &headers)?;
    let documents = state.documents.manifest(user_id).await?;
    Ok(Json(ManifestResponse { documents }))
}

pub async fn upload_asset(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Json<AssetUploadResponse>> {
    let user_id = bearer_user_id(&state, &headers)?;

    let mut entry_id: Option<Uuid> = None;
    let mut filename = String::new();
    let mut mime_type = String::new();
    let mut data: Option<Vec<u8>> = None;
    let mut wrapped_dek: Option<String> = None;
    let mut dek_nonce: Option<String> = None;
    let mut dek_auth_tag: Option<String> = None;
    let mut content_nonce: Option<String> = None;
    let mut content_auth_tag: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| ApiError::Multipart(e.to_string()))? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "entryId" => {
                let text = field.text().await.map_err(|e| ApiError::Multipart(e.to_string()))?;
                entry_id = Some(Uuid::parse_str(&text).map_err(|_| ApiError::ProtocolViolation)?);
            }
            "filename" => {
                filename = field.text().await.map_err(|e| ApiError::Multipart(e.to_string()))?;
            }
            "mimeType" => {
                mime_type = field.text().await.map_err(|e| ApiError::Multipart(e.to_string()))?;
            }
            "wrappedDek" => wrapped_dek = Some(field.text().await.map_err(|e| ApiError::Multipart(e.to_string()))?),
            "dekNonce" => dek_nonce = Some(field.text().await.map_err(|e| ApiError::Multipart(e.to_string()))?),
            "dekAuthTag" => dek_auth_tag = Some(field.text().await.map_err(|e| ApiError::Multipart(e.to_string()))?),
            "contentNonce" => {
                content_nonce = Some(field.text().await.map_err(|e| ApiError::Multipart(e.to_string()))?)
            }
            "contentAuthTag" => {
                content_auth_tag = Some(field.text().await.map_err(|e| ApiError::Multipart(e.to_string()))?)
            }
            "file" => {
                if mime_type.is_empty() {
                    mime_type = field.content_type().unwrap_or("application/octet-stream").to_string();
                }
                if filename.is_empty() {
                    filename = field.file_name().unwrap_or("asset").to_string();
                }
                data = Some(field.bytes().await.map_err(|e| ApiError::Multipart(e.to_string()))?.to_vec());
            }
            _ => {}
        }
    }

    let entry_id = entry_id.ok_or_else(|| ApiError::Multipart("missing entryId field".into()))?;
    let data = data.ok_or_else(|| ApiError::Multipart("missing file field".into()))?;
    let encryption = match (wrapped_dek, dek_nonce, dek_auth_tag, content_nonce, content_auth_tag) {
        (Some(wrapped_dek), Some(dek_nonce), Some(dek_auth_tag), Some(content_nonce), Some(content_auth_tag)) => {
            Some(AssetEncryptionMeta { wrapped_dek, dek_nonce, dek_auth_tag, content_nonce, content_auth_tag })
        }
        _ => None,
    };
    let is_encrypted = encryption.is_some();

    let id = state
        .assets
        .upload(
            user_id,
            NewAsset { entry_id, filename, mime_type, data, encryption },
            chrono::Utc::now().timestamp_millis(),
        )
        .await?;

    Ok(Json(AssetUploadResponse { id, url: format!("/api/assets/{id}"), is_encrypted }))
}

pub async fn get_asset(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<Uuid>) -> ApiResult<Response> {
    let user_id = bearer_user_id(&state, &headers)?;
    let (bytes, mime_type) = state.assets.bytes_for_user(id, user_id).await?;
    Ok(([(header::CONTENT_TYPE, mime_type)], bytes).into_response())
}

pub async fn get_asset_metadata(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<journal_core::wire::AssetMetadataResponse>> {
    let user_id = bearer_user_id(&state, &headers)?;
    Ok(Json(state.assets.metadata_for_user(id, user_id).await?))
}

pub async fn delete_asset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let user_id = bearer_user_id(&state, &headers)?;
    state.assets.delete_for_user(id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
