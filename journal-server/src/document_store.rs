//! Persisted CRDT document state: one row per document uuid holding the
//! latest full Yjs state vector, owned by exactly one user.
//!
//! Grounded on the teacher's `db::models` row-struct-plus-plain-queries style;
//! ownership is enforced here rather than left to the caller so `WSGateway`
//! and the REST manifest handler share one access-control chokepoint.

use sqlx::SqlitePool;
use uuid::Uuid;

use journal_core::wire::ManifestEntry;

use crate::error::ApiError;

pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns the owning user id, if the document exists at all.
    pub async fn owner_of(&self, uuid: Uuid) -> Result<Option<Uuid>, ApiError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT user_id FROM documents WHERE uuid = ?")
            .bind(uuid.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|(s,)| Uuid::parse_str(&s).ok()))
    }

    /// Loads a document's state, provided `user_id` owns it (or it does not
    /// exist yet, in which case `Ok(None)` is returned so the caller can
    /// bootstrap a fresh document).
    pub async fn get_for_user(&self, uuid: Uuid, user_id: Uuid) -> Result<Option<Vec<u8>>, ApiError> {
        let row: Option<(String, Vec<u8>)> =
            sqlx::query_as("SELECT user_id, yjs_state FROM documents WHERE uuid = ?")
                .bind(uuid.to_string())
                .fetch_optional(&self.pool)
                .await?;
        match row {
            None => Ok(None),
            Some((owner, state)) => {
                if owner != user_id.to_string() {
                    return Err(ApiError::AccessDenied);
                }
                Ok(Some(state))
            }
        }
    }

    /// Creates the document row on first write, owned by `user_id`.
    pub async fn upsert(
        &self,
        uuid: Uuid,
        user_id: Uuid,
        state: &[u8],
        updated_by: &str,
        now_ms: i64,
    ) -> Result<(), ApiError> {
        if let Some(owner) = self.owner_of(uuid).await? {
            if owner != user_id {
                return Err(ApiError::AccessDenied);
            }
            sqlx::query("UPDATE documents SET yjs_state = ?, updated_at = ?, updated_by = ? WHERE uuid = ?")
                .bind(state)
                .bind(now_ms)
                .bind(updated_by)
                .bind(uuid.to_string())
                .execute(&self.pool)
                .await?;
        } else {
            sqlx::query(
                "INSERT INTO documents (uuid, user_id, yjs_state, created_at, updated_at, updated_by) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(uuid.to_string())
            .bind(user_id.to_string())
            .bind(state)
            .bind(now_ms)
            .bind(now_ms)
            .bind(updated_by)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn manifest(&self, user_id: Uuid) -> Result<Vec<ManifestEntry>, ApiError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT uuid, updated_at FROM documents WHERE user_id = ? ORDER BY updated_at DESC")
                .bind(user_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(uuid, updated_at)| Some(ManifestEntry { uuid: Uuid::parse_str(&uuid).ok()?, updated_at }))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_then_fetch_round_trip() {
        let pool = crate::db::connect("sqlite::memory:").await.unwrap();
        let store = DocumentStore::new(pool);
        let user_id = Uuid::new_v4();
        let doc_id = Uuid::new_v4();

        store.upsert(doc_id, user_id, b"state-v1", "session-a", 1000).await.unwrap();
        let loaded = store.get_for_user(doc_id, user_id).await.unwrap().unwrap();
        assert_eq!(loaded, b"state-v1");

        let manifest = store.manifest(user_id).await.unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest[0].uuid, doc_id);
    }

    #[tokio::test]
    async fn foreign_owner_is_denied() {
        let pool = crate::db::connect("sqlite::memory:").await.unwrap();
        let store = DocumentStore::new(pool);
        let owner = Uuid::new_v4();
        let intruder = Uuid::new_v4();
        let doc_id = Uuid::new_v4();

        store.upsert(doc_id, owner, b"state", "session-a", 1000).await.unwrap();
        let err = store.get_for_user(doc_id, intruder).await.unwrap_err();
        assert!(matches!(err, ApiError::AccessDenied));

        let err = store.upsert(doc_id, intruder, b"state-2", "session-b", 2000).await.unwrap_err();
        assert!(matches!(err, ApiError::AccessDenied));
    }
}
