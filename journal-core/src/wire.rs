//! Wire contracts shared between the client and the server: the encrypted
//! envelope, the manifest shape, and the REST request/response DTOs.
//!
//! Grounded on the teacher's `sync::envelope::ChangesetEnvelope` in spirit
//! (a small serde struct with an explicit version field) but field-based
//! rather than packed-blob, since the journal envelope travels as JSON inside
//! a CRDT map rather than as a standalone byte blob.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ENVELOPE_VERSION: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WrappedKey {
    pub user_id: Uuid,
    pub wrapped_dek: String,
    pub dek_nonce: String,
    pub dek_auth_tag: String,
}

/// The unit of sync: one entry's content, opaque to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncryptedEnvelope {
    pub ciphertext: String,
    pub nonce: String,
    pub auth_tag: String,
    pub wrapped_key: WrappedKey,
    pub version: u32,
}

impl EncryptedEnvelope {
    pub fn is_supported(&self) -> bool {
        self.version == ENVELOPE_VERSION
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub uuid: Uuid,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestResponse {
    pub documents: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UekRegistration {
    pub wrapped_uek: String,
    pub salt: String,
    pub nonce: String,
    pub auth_tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UekRecordDto {
    pub wrapped_uek: String,
    pub salt: String,
    pub nonce: String,
    pub auth_tag: String,
    pub version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub uek: Option<UekRegistration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: UserDto,
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub uek: Option<UekRecordDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetUploadResponse {
    pub id: Uuid,
    pub url: String,
    #[serde(default)]
    pub is_encrypted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetEncryptionMeta {
    pub wrapped_dek: String,
    pub dek_nonce: String,
    pub dek_auth_tag: String,
    pub content_nonce: String,
    pub content_auth_tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMetadataResponse {
    pub id: Uuid,
    pub entry_id: Uuid,
    pub filename: String,
    pub mime_type: String,
    pub size: i64,
    pub url: String,
    pub created_at: i64,
    pub is_encrypted: bool,
    #[serde(default)]
    pub encryption: Option<AssetEncryptionMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub ok: bool,
    pub service: String,
}
