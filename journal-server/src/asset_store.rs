//! Blob storage for journal assets (images, attachments). Content is stored
//! encrypted at rest exactly as the client sent it; the server never holds a
//! DEK and cannot decrypt asset bytes.

use sqlx::SqlitePool;
use uuid::Uuid;

use journal_core::wire::{AssetEncryptionMeta, AssetMetadataResponse};

use crate::error::ApiError;

pub struct NewAsset {
    pub entry_id: Uuid,
    pub filename: String,
    pub mime_type: String,
    pub data: Vec<u8>,
    pub encryption: Option<AssetEncryptionMeta>,
}

pub struct AssetStore {
    pool: SqlitePool,
}

impl AssetStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upload(&self, owner_user_id: Uuid, asset: NewAsset, now_ms: i64) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        let size = asset.data.len() as i64;
        let is_encrypted = asset.encryption.is_some();
        let (wrapped_dek, dek_nonce, dek_auth_tag, content_nonce, content_auth_tag) = match &asset.encryption {
            Some(enc) => (
                Some(enc.wrapped_dek.clone()),
                Some(enc.dek_nonce.clone()),
                Some(enc.dek_auth_tag.clone()),
                Some(enc.content_nonce.clone()),
                Some(enc.content_auth_tag.clone()),
            ),
            None => (None, None, None, None, None),
        };

        sqlx::query(
            "INSERT INTO assets (id, entry_id, owner_user_id, filename, mime_type, size, data, is_encrypted, \
             wrapped_dek, dek_nonce, dek_auth_tag, content_nonce, content_auth_tag, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(asset.entry_id.to_string())
        .bind(owner_user_id.to_string())
        .bind(&asset.filename)
        .bind(&asset.mime_type)
        .bind(size)
        .bind(&asset.data)
        .bind(is_encrypted)
        .bind(wrapped_dek)
        .bind(dek_nonce)
        .bind(dek_auth_tag)
        .bind(content_nonce)
        .bind(content_auth_tag)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn bytes_for_user(&self, id: Uuid, user_id: Uuid) -> Result<(Vec<u8>, String), ApiError> {
        let row: Option<(String, Vec<u8>, String)> =
            sqlx::query_as("SELECT owner_user_id, data, mime_type FROM assets WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        let (owner, data, mime_type) = row.ok_or(ApiError::AssetNotFound)?;
        if owner != user_id.to_string() {
            return Err(ApiError::AccessDenied);
        }
        Ok((data, mime_type))
    }

    pub async fn metadata_for_user(&self, id: Uuid, user_id: Uuid) -> Result<AssetMetadataResponse, ApiError> {
        #[allow(clippy::type_complexity)]
        let row: Option<(
            String,
            String,
            String,
            String,
            i64,
            i64,
            bool,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
        )> = sqlx::query_as(
            "SELECT owner_user_id, entry_id, filename, mime_type, size, created_at, is_encrypted, \
             wrapped_dek, dek_nonce, dek_auth_tag, content_nonce, content_auth_tag FROM assets WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let (
            owner,
            entry_id,
            filename,
            mime_type,
            size,
            created_at,
            is_encrypted,
            wrapped_dek,
            dek_nonce,
            dek_auth_tag,
            content_nonce,
            content_auth_tag,
        ) = row.ok_or(ApiError::AssetNotFound)?;
        if owner != user_id.to_string() {
            return Err(ApiError::AccessDenied);
        }

        let encryption = if is_encrypted {
            Some(AssetEncryptionMeta {
                wrapped_dek: wrapped_dek.unwrap_or_default(),
                dek_nonce: dek_nonce.unwrap_or_default(),
                dek_auth_tag: dek_auth_tag.unwrap_or_default(),
                content_nonce: content_nonce.unwrap_or_default(),
                content_auth_tag: content_auth_tag.unwrap_or_default(),
            })
        } else {
            None
        };

        Ok(AssetMetadataResponse {
            id,
            entry_id: Uuid::parse_str(&entry_id).map_err(|_| ApiError::ProtocolViolation)?,
            filename,
            mime_type,
            size,
            url: format!("/api/assets/{id}"),
            created_at,
            is_encrypted,
            encryption,
        })
    }

    pub async fn delete_for_user(&self, id: Uuid, user_id: Uuid) -> Result<(), ApiError> {
        let owner: Option<(String,)> = sqlx::query_as("SELECT owner_user_id FROM assets WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        let owner = owner.ok_or(ApiError::AssetNotFound)?.0;
        if owner != user_id.to_string() {
            return Err(ApiError::AccessDenied);
        }
        sqlx::query("DELETE FROM assets WHERE id = ?").bind(id.to_string()).execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_then_fetch_round_trip() {
        let pool = crate::db::connect("sqlite::memory:").await.unwrap();
        let store = AssetStore::new(pool);
        let user_id = Uuid::new_v4();

        let id = store
            .upload(
                user_id,
                NewAsset {
                    entry_id: Uuid::new_v4(),
                    filename: "photo.jpg".into(),
                    mime_type: "image/jpeg".into(),
                    data: b"ciphertext-bytes".to_vec(),
                    encryption: Some(AssetEncryptionMeta {
                        wrapped_dek: "wdek".into(),
                        dek_nonce: "n1".into(),
                        dek_auth_tag: "t1".into(),
                        content_nonce: "n2".into(),
                        content_auth_tag: "t2".into(),
                    }),
                },
                1000,
            )
            .await
            .unwrap();

        let (bytes, mime) = store.bytes_for_user(id, user_id).await.unwrap();
        assert_eq!(bytes, b"ciphertext-bytes");
        assert_eq!(mime, "image/jpeg");

        let meta = store.metadata_for_user(id, user_id).await.unwrap();
        assert!(meta.is_encrypted);
        assert_eq!(meta.encryption.unwrap().wrapped_dek, "wdek");
    }

    #[tokio::test]
    async fn foreign_user_denied() {
        let pool = crate::db::connect("sqlite::memory:").await.unwrap();
        let store = AssetStore::new(pool);
        let owner = Uuid::new_v4();
        let intruder = Uuid::new_v4();

        let id = store
            .upload(
                owner,
                NewAsset {
                    entry_id: Uuid::new_v4(),
                    filename: "a.png".into(),
                    mime_type: "image/png".into(),
                    data: b"bytes".to_vec(),
                    encryption: None,
                },
                1000,
            )
            .await
            .unwrap();

        let err = store.bytes_for_user(id, intruder).await.unwrap_err();
        assert!(matches!(err, ApiError::AccessDenied));
    }
}
