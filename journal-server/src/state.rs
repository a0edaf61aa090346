//! Shared application state handed to every axum handler via `State`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;
use yrs::{Doc, Transact};

use crate::asset_store::AssetStore;
use crate::audit_log::AuditLog;
use crate::auth::AuthService;
use crate::document_store::DocumentStore;
use crate::rate_limiter::RateLimiter;

/// One live CRDT document plus a broadcast channel relaying binary updates
/// between the WebSocket peers currently viewing it.
pub struct DocumentRuntime {
    pub doc: Doc,
    pub updates: broadcast::Sender<Vec<u8>>,
}

impl DocumentRuntime {
    fn new(initial_state: Option<&[u8]>) -> Result<Self, String> {
        let doc = Doc::new();
        if let Some(bytes) = initial_state {
            let update = yrs::Update::decode_v1(bytes).map_err(|e| e.to_string())?;
            let mut txn = doc.transact_mut();
            txn.apply_update(update).map_err(|e| e.to_string())?;
        }
        let (tx, _rx) = broadcast::channel(256);
        Ok(Self { doc, updates: tx })
    }
}

/// In-memory registry of live document runtimes, keyed by document uuid.
/// Lazily populated from `DocumentStore` on first connection.
#[derive(Default)]
pub struct DocumentRegistry {
    runtimes: Mutex<HashMap<Uuid, Arc<DocumentRuntime>>>,
}

impl DocumentRegistry {
    pub async fn get_or_create(
        &self,
        uuid: Uuid,
        initial_state: Option<&[u8]>,
    ) -> Result<Arc<DocumentRuntime>, String> {
        let mut runtimes = self.runtimes.lock().await;
        if let Some(existing) = runtimes.get(&uuid) {
            return Ok(Arc::clone(existing));
        }
        let runtime = Arc::new(DocumentRuntime::new(initial_state)?);
        runtimes.insert(uuid, Arc::clone(&runtime));
        Ok(runtime)
    }
}

pub struct AppStateInner {
    pub pool: sqlx::SqlitePool,
    pub auth: AuthService,
    pub documents: DocumentStore,
    pub assets: AssetStore,
    pub audit: AuditLog,
    pub rate_limiter: RateLimiter,
    pub registry: DocumentRegistry,
}

pub type AppState = Arc<AppStateInner>;

pub struct AppConfig {
    pub jwt_secret: String,
    pub access_ttl_s: i64,
    pub refresh_ttl_days: i64,
    pub rate_limit_window: Duration,
    pub rate_limit_max_connections: usize,
}

pub fn build_state(pool: sqlx::SqlitePool, config: AppConfig) -> AppState {
    Arc::new(AppStateInner {
        auth: AuthService::new(pool.clone(), config.jwt_secret, config.access_ttl_s, config.refresh_ttl_days),
        documents: DocumentStore::new(pool.clone()),
        assets: AssetStore::new(pool.clone()),
        audit: AuditLog::new(pool.clone()),
        rate_limiter: RateLimiter::new(config.rate_limit_window, config.rate_limit_max_connections),
        registry: DocumentRegistry::default(),
        pool,
    })
}
