//! Append-only audit trail for document writes and access-control denials.

use sqlx::SqlitePool;
use uuid::Uuid;

pub struct AuditLog {
    pool: SqlitePool,
}

impl AuditLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(
        &self,
        user_id: Option<Uuid>,
        action: &str,
        document_uuid: Option<Uuid>,
        detail: Option<&str>,
        now_ms: i64,
    ) {
        let result = sqlx::query(
            "INSERT INTO audit_log (user_id, action, document_uuid, detail, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id.map(|u| u.to_string()))
        .bind(action)
        .bind(document_uuid.map(|u| u.to_string()))
        .bind(detail)
        .bind(now_ms)
        .execute(&self.pool)
        .await;

        if let Err(err) = result {
            tracing::warn!(%err, action, "failed to write audit log entry");
        }
    }
}
