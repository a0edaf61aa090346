//! Attachment upload/download: WiFi-gated, encrypt-then-upload, retry with
//! backoff.
//!
//! Grounded on `storage::traits::ReleaseStorage` for the trait/impl-pairing
//! shape and progress-callback convention, and on `retry::retry_with_backoff`
//! for the retry idiom (here driven by the exact 3-attempt asset schedule
//! rather than the teacher's `500ms * attempt` formula).

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto;
use crate::error::ErrorKind;
use crate::network::Connectivity;
use crate::retry;
use crate::wire::AssetEncryptionMeta;

pub const ASSET_RETRY_SCHEDULE_MS: [u64; 3] = [1_000, 5_000, 15_000];
pub const DEFAULT_WIFI_THRESHOLD_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Uploaded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetUpload {
    pub id: i64,
    /// Local row id of the owning entry. Device-local only; `upload_once`
    /// takes the entry's stable uuid separately for the wire request.
    pub entry_id: i64,
    pub local_path: String,
    pub remote_url: Option<String>,
    pub file_size: u64,
    pub status: UploadStatus,
    pub error: Option<String>,
    pub retry_count: u32,
}

#[derive(Error, Debug)]
pub enum AssetError {
    #[error(transparent)]
    Crypto(#[from] crypto::CryptoError),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("local file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server rejected the upload with status {0}")]
    ServerRejected(u16),
}

impl AssetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AssetError::Crypto(e) => e.kind(),
            AssetError::Network(_) => ErrorKind::Transient,
            AssetError::Io(_) => ErrorKind::Transient,
            AssetError::ServerRejected(status) if *status == 403 => ErrorKind::AccessDenied,
            AssetError::ServerRejected(_) => ErrorKind::Transient,
        }
    }
}

/// Whether a file of this size may upload/download over the current
/// connectivity, per the WiFi gate.
pub fn passes_wifi_gate(file_size: u64, threshold: u64, connectivity: Connectivity) -> bool {
    if file_size <= threshold {
        connectivity.is_online()
    } else {
        connectivity.satisfies_wifi_gate()
    }
}

pub struct EncryptedUpload {
    pub ciphertext: Vec<u8>,
    pub meta: AssetEncryptionMeta,
}

/// Encrypt file bytes with a fresh DEK wrapped under the UEK, producing the
/// multipart fields the upload request attaches alongside `file`.
pub fn encrypt_for_upload(plaintext: &[u8], uek: &[u8]) -> Result<EncryptedUpload, AssetError> {
    let dek = crypto::generate_key();
    let content = crypto::seal(&dek, plaintext)?;
    let wrapped = crypto::wrap_key(uek, &dek)?;

    let mut ciphertext = content.ciphertext;
    Ok(EncryptedUpload {
        meta: AssetEncryptionMeta {
            wrapped_dek: B64.encode(wrapped.ciphertext),
            dek_nonce: B64.encode(wrapped.nonce),
            dek_auth_tag: B64.encode(wrapped.tag),
            content_nonce: B64.encode(content.nonce),
            content_auth_tag: B64.encode(content.tag),
        },
        ciphertext: {
            // Keep ciphertext and tag apart on the wire, as for entry envelopes.
            ciphertext.shrink_to_fit();
            ciphertext
        },
    })
}

pub fn decrypt_download(
    ciphertext: &[u8],
    meta: &AssetEncryptionMeta,
    uek: &[u8],
) -> Result<Vec<u8>, AssetError> {
    let wrapped_dek = B64.decode(&meta.wrapped_dek).map_err(|_| crypto::CryptoError::Aead)?;
    let dek_nonce: [u8; crypto::NONCE_LEN] = B64
        .decode(&meta.dek_nonce)
        .map_err(|_| crypto::CryptoError::Aead)?
        .try_into()
        .map_err(|_| crypto::CryptoError::Aead)?;
    let dek_tag: [u8; crypto::TAG_LEN] = B64
        .decode(&meta.dek_auth_tag)
        .map_err(|_| crypto::CryptoError::Aead)?
        .try_into()
        .map_err(|_| crypto::CryptoError::Aead)?;
    let dek = crypto::unwrap_key(uek, &wrapped_dek, &dek_nonce, &dek_tag)?;

    let content_nonce: [u8; crypto::NONCE_LEN] = B64
        .decode(&meta.content_nonce)
        .map_err(|_| crypto::CryptoError::Aead)?
        .try_into()
        .map_err(|_| crypto::CryptoError::Aead)?;
    let content_tag: [u8; crypto::TAG_LEN] = B64
        .decode(&meta.content_auth_tag)
        .map_err(|_| crypto::CryptoError::Aead)?
        .try_into()
        .map_err(|_| crypto::CryptoError::Aead)?;

    Ok(crypto::open(&dek, ciphertext, &content_nonce, &content_tag)?)
}

/// Drains pending uploads one at a time, respecting the WiFi gate and the
/// retry schedule. A real host wires this to a `tokio::spawn`ed loop woken
/// by `NetworkMonitor` transitions; exposed here as a single-step function so
/// it can be driven and tested deterministically.
pub async fn upload_once(
    http: &reqwest::Client,
    base_url: &str,
    access_token: &str,
    entry_uuid: uuid::Uuid,
    upload: &AssetUpload,
    plaintext: &[u8],
    filename: &str,
    mime_type: &str,
    uek: Option<&[u8]>,
) -> Result<String, AssetError> {
    let mut form = reqwest::multipart::Form::new()
        .text("entryId", entry_uuid.to_string())
        .text("filename", filename.to_string())
        .text("mimeType", mime_type.to_string());

    let body = if let Some(uek) = uek {
        let encrypted = encrypt_for_upload(plaintext, uek)?;
        form = form
            .text("wrappedDek", encrypted.meta.wrapped_dek.clone())
            .text("dekNonce", encrypted.meta.dek_nonce.clone())
            .text("dekAuthTag", encrypted.meta.dek_auth_tag.clone())
            .text("contentNonce", encrypted.meta.content_nonce.clone())
            .text("contentAuthTag", encrypted.meta.content_auth_tag.clone());
        encrypted.ciphertext
    } else {
        plaintext.to_vec()
    };
    form = form.part("file", reqwest::multipart::Part::bytes(body).file_name(filename.to_string()));

    let response = http
        .post(format!("{base_url}/api/assets/upload"))
        .bearer_auth(access_token)
        .multipart(form)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(AssetError::ServerRejected(response.status().as_u16()));
    }
    let body: crate::wire::AssetUploadResponse = response.json().await?;
    Ok(body.url)
}

pub fn next_retry_delay(retry_count: u32) -> Option<std::time::Duration> {
    retry::next_delay(&ASSET_RETRY_SCHEDULE_MS, retry_count)
}

pub fn retries_exhausted(retry_count: u32) -> bool {
    retry::exhausted(&ASSET_RETRY_SCHEDULE_MS, retry_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_file_allowed_on_cellular() {
        assert!(passes_wifi_gate(1024, DEFAULT_WIFI_THRESHOLD_BYTES, Connectivity::Cellular));
    }

    #[test]
    fn large_file_blocked_on_cellular_allowed_on_wifi() {
        let big = DEFAULT_WIFI_THRESHOLD_BYTES + 1;
        assert!(!passes_wifi_gate(big, DEFAULT_WIFI_THRESHOLD_BYTES, Connectivity::Cellular));
        assert!(passes_wifi_gate(big, DEFAULT_WIFI_THRESHOLD_BYTES, Connectivity::Wifi));
    }

    #[test]
    fn offline_blocks_everything() {
        assert!(!passes_wifi_gate(10, DEFAULT_WIFI_THRESHOLD_BYTES, Connectivity::None));
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let uek = crypto::generate_key();
        let plaintext = b"attachment bytes";
        let encrypted = encrypt_for_upload(plaintext, &uek).unwrap();
        let decrypted = decrypt_download(&encrypted.ciphertext, &encrypted.meta, &uek).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn asset_retry_schedule_has_three_attempts() {
        assert!(!retries_exhausted(2));
        assert!(retries_exhausted(3));
        assert_eq!(next_retry_delay(0), Some(std::time::Duration::from_millis(1_000)));
    }
}
