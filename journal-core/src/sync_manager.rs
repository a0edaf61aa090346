//! Orchestrates reconciliation and per-entry sync sessions on top of
//! [`crate::queue::SyncQueue`], [`crate::sync_client::SyncClient`], and the
//! host-supplied [`crate::store::EntryStore`].
//!
//! Grounded on the teacher's `sync::service::SyncService` (the top-level
//! object a host app owns, wiring together the bucket client, the conflict
//! handler, and the local database) but restructured around per-document
//! CRDT sessions instead of one-shot changeset pushes.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::codec::{self, CodecError};
use crate::crdt::{CrdtDocument, CrdtError};
use crate::entry::{Entry, SyncStatus, SyncedFields};
use crate::error::ErrorKind;
use crate::keys::{KeyError, KeyManager};
use crate::queue::{QueueError, QueueStore, SyncQueue};
use crate::store::{ApplyRemote, EntryStore, StoreError};
use crate::sync_client::{SyncClient, SyncClientError};
use crate::wire::{EncryptedEnvelope, ManifestResponse};

#[derive(Error, Debug)]
pub enum SyncManagerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Client(#[from] SyncClientError),
    #[error(transparent)]
    Crdt(#[from] CrdtError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("network error talking to the manifest endpoint: {0}")]
    Network(#[from] reqwest::Error),
    #[error("no local entry with uuid {0} to push")]
    NothingToPush(Uuid),
}

impl SyncManagerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncManagerError::Store(e) => e.kind(),
            SyncManagerError::Queue(e) => e.kind(),
            SyncManagerError::Client(e) => e.kind(),
            SyncManagerError::Crdt(e) => e.kind(),
            SyncManagerError::Codec(e) => e.kind(),
            SyncManagerError::Key(e) => e.kind(),
            SyncManagerError::Network(_) => ErrorKind::Transient,
            SyncManagerError::NothingToPush(_) => ErrorKind::ProtocolViolation,
        }
    }
}

/// What reconciliation decided to do with each document, for the host's
/// UI/logging. Not part of the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Push,
    Pull,
    NoOp,
}

#[derive(Debug, Default)]
pub struct ReconciliationReport {
    pub pushed: Vec<Uuid>,
    pub pulled: Vec<Uuid>,
    pub no_op: Vec<Uuid>,
}

/// Callbacks the host app implements to react to a remote change being
/// applied (refresh an open editor, surface a deletion, etc). Kept as a
/// trait rather than a closure so it can be `Send + Sync` and stored.
#[async_trait]
pub trait RemoteChangeObserver: Send + Sync {
    async fn on_remote_update(&self, uuid: Uuid);
    async fn on_remote_delete(&self, uuid: Uuid);
}

/// Observer that does nothing, for hosts that only care about
/// `perform_reconciliation`'s return value.
pub struct NoopObserver;

#[async_trait]
impl RemoteChangeObserver for NoopObserver {
    async fn on_remote_update(&self, _uuid: Uuid) {}
    async fn on_remote_delete(&self, _uuid: Uuid) {}
}

pub struct SyncManager<E: EntryStore, Q: QueueStore> {
    entry_store: Arc<E>,
    queue: Arc<SyncQueue<Q>>,
    client: Arc<SyncClient>,
    keys: KeyManager,
    http: reqwest::Client,
    base_url: String,
    user_id: Uuid,
}

impl<E: EntryStore + 'static, Q: QueueStore + Clone + 'static> SyncManager<E, Q> {
    pub fn new(
        entry_store: Arc<E>,
        queue: Arc<SyncQueue<Q>>,
        client: Arc<SyncClient>,
        keys: KeyManager,
        http: reqwest::Client,
        base_url: impl Into<String>,
        user_id: Uuid,
    ) -> Self {
        Self {
            entry_store,
            queue,
            client,
            keys,
            http,
            base_url: base_url.into(),
            user_id,
        }
    }

    fn uek(&self) -> Result<[u8; crate::crypto::DEK_LEN], SyncManagerError> {
        Ok(self.keys.get_uek()?)
    }

    /// Fetches the server's manifest and diffs it against the local store,
    /// pushing entries the server doesn't have, pulling entries the device
    /// doesn't have, and doing nothing for entries already at the same
    /// `updated_at` on both sides.
    pub async fn perform_reconciliation(
        &self,
        access_token: &str,
        session_id: &str,
        display_name: &str,
        observer: &dyn RemoteChangeObserver,
    ) -> Result<ReconciliationReport, SyncManagerError> {
        let manifest: ManifestResponse = self
            .http
            .get(format!("{}/api/documents/manifest", self.base_url))
            .bearer_auth(access_token)
            .send()
            .await?
            .json()
            .await?;

        let local = self.entry_store.list_uuids_with_updated_at().await?;
        let mut remote_by_uuid: std::collections::HashMap<Uuid, i64> =
            manifest.documents.into_iter().map(|d| (d.uuid, d.updated_at)).collect();

        let mut report = ReconciliationReport::default();

        for (uuid, local_updated_at) in &local {
            match remote_by_uuid.remove(uuid) {
                None => {
                    self.push_entry_by_uuid(*uuid, access_token, session_id, display_name).await?;
                    report.pushed.push(*uuid);
                }
                Some(remote_updated_at) if remote_updated_at > *local_updated_at => {
                    self.pull_entry(*uuid, access_token, session_id, display_name, observer).await?;
                    report.pulled.push(*uuid);
                }
                Some(remote_updated_at) if remote_updated_at < *local_updated_at => {
                    self.push_entry_by_uuid(*uuid, access_token, session_id, display_name).await?;
                    report.pushed.push(*uuid);
                }
                Some(_) => report.no_op.push(*uuid),
            }
        }

        // Whatever's left in remote_by_uuid exists only on the server.
        for uuid in remote_by_uuid.into_keys() {
            self.pull_entry(uuid, access_token, session_id, display_name, observer).await?;
            report.pulled.push(uuid);
        }

        Ok(report)
    }

    /// Opens a document session for `uuid`, waits (non-fatally) for the
    /// initial sync, and decides push/pull/no-op by comparing the remote
    /// `updated_at` surfaced by the CRDT doc against the local entry.
    /// Installs no persistent observer by itself -- callers that want live
    /// updates should poll `session.doc` or drive their own apply loop
    /// against [`Self::apply_incoming`].
    pub async fn open_entry(
        &self,
        uuid: Uuid,
        access_token: &str,
        session_id: &str,
        display_name: &str,
    ) -> Result<ReconcileAction, SyncManagerError> {
        let session = self
            .client
            .connect_document(uuid, access_token, session_id, display_name)
            .await?;
        session.wait_for_sync().await;

        let local = self.entry_store.get_by_uuid(uuid).await?;
        let remote = session.doc.read_encrypted()?;

        match (local, remote) {
            (Some(entry), Some(meta)) if meta.updated_at > entry.updated_at => {
                self.apply_incoming(uuid, &meta.envelope, meta.updated_at, meta.deleted).await?;
                Ok(ReconcileAction::Pull)
            }
            (Some(entry), Some(meta)) if meta.updated_at < entry.updated_at => {
                self.write_local_into_doc(&session.doc, &entry)?;
                session.push_update(session.doc.encode_state());
                Ok(ReconcileAction::Push)
            }
            (Some(_), Some(_)) => Ok(ReconcileAction::NoOp),
            (Some(entry), None) => {
                self.write_local_into_doc(&session.doc, &entry)?;
                session.push_update(session.doc.encode_state());
                Ok(ReconcileAction::Push)
            }
            (None, Some(meta)) => {
                self.apply_incoming(uuid, &meta.envelope, meta.updated_at, meta.deleted).await?;
                Ok(ReconcileAction::Pull)
            }
            (None, None) => Ok(ReconcileAction::NoOp),
        }
    }

    pub async fn close_entry(&self, uuid: Uuid) {
        self.client.disconnect_document(uuid).await;
    }

    fn write_local_into_doc(&self, doc: &CrdtDocument, entry: &Entry) -> Result<(), SyncManagerError> {
        let uek = self.uek()?;
        let synced = SyncedFields::from(entry);
        let envelope = codec::encrypt_entry(&synced, self.user_id, &uek)?;
        doc.write_encrypted(&envelope, entry.created_at, entry.updated_at);
        Ok(())
    }

    async fn push_entry_by_uuid(
        &self,
        uuid: Uuid,
        access_token: &str,
        session_id: &str,
        display_name: &str,
    ) -> Result<(), SyncManagerError> {
        let entry = self
            .entry_store
            .get_by_uuid(uuid)
            .await?
            .ok_or(SyncManagerError::NothingToPush(uuid))?;
        let session = self
            .client
            .connect_document(uuid, access_token, session_id, display_name)
            .await?;
        self.write_local_into_doc(&session.doc, &entry)?;
        session.push_update(session.doc.encode_state());
        self.entry_store.set_sync_status(uuid, SyncStatus::Synced).await?;
        Ok(())
    }

    async fn pull_entry(
        &self,
        uuid: Uuid,
        access_token: &str,
        session_id: &str,
        display_name: &str,
        observer: &dyn RemoteChangeObserver,
    ) -> Result<(), SyncManagerError> {
        let session = self
            .client
            .connect_document(uuid, access_token, session_id, display_name)
            .await?;
        session.wait_for_sync().await;
        if let Some(meta) = session.doc.read_encrypted()? {
            self.apply_incoming(uuid, &meta.envelope, meta.updated_at, meta.deleted).await?;
            if meta.deleted {
                observer.on_remote_delete(uuid).await;
            } else {
                observer.on_remote_update(uuid).await;
            }
        }
        Ok(())
    }

    /// Decrypts `envelope` and writes only the fields the decrypted payload
    /// carries. A `deleted` flag removes the local row outright rather than
    /// writing an `ApplyRemote`.
    async fn apply_incoming(
        &self,
        uuid: Uuid,
        envelope: &EncryptedEnvelope,
        updated_at: i64,
        deleted: bool,
    ) -> Result<(), SyncManagerError> {
        if deleted {
            self.entry_store.mark_deleted_locally(uuid).await?;
            return Ok(());
        }

        let uek = self.uek()?;
        let synced = codec::decrypt_entry(envelope, self.user_id, &uek)?;
        let fields = ApplyRemote {
            title: Some(synced.title),
            blocks: Some(synced.blocks),
            tags: Some(synced.tags),
            is_favorite: Some(synced.is_favorite),
            is_pinned: Some(synced.is_pinned),
            archived_at: Some(synced.archived_at),
            agent_id: Some(synced.agent_id),
            attachments: Some(synced.attachments),
            updated_at,
            sync_status: SyncStatus::Synced,
        };

        match self.entry_store.get_by_uuid(uuid).await? {
            Some(_) => self.entry_store.apply_remote(uuid, fields).await?,
            None => {
                self.entry_store.insert_from_remote(uuid, fields).await?;
            }
        }
        Ok(())
    }

    /// Enqueue the sync operation implied by a local write, for the host's
    /// editor to call right after committing to its own database.
    pub async fn entry_created(&self, entry: &Entry) -> Result<(), SyncManagerError> {
        self.queue
            .enqueue_create(entry.id, entry.uuid, entry.updated_at, entry.created_at)
            .await?;
        Ok(())
    }

    pub async fn entry_updated(&self, entry: &Entry, now: i64) -> Result<(), SyncManagerError> {
        let payload = serde_json::to_value(SyncedFields::from(entry))
            .expect("SyncedFields always serializes");
        self.queue
            .enqueue_update(entry.id, entry.uuid, payload, entry.updated_at, now)
            .await?;
        Ok(())
    }

    pub async fn entry_deleted(&self, uuid: Uuid, now: i64) -> Result<(), SyncManagerError> {
        self.queue.enqueue_delete(uuid, now).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntryType, SyncStatus};
    use crate::queue::fakes::InMemoryQueueStore;
    use crate::store::fakes::InMemoryEntryStore;

    fn sample_entry(uuid: Uuid) -> Entry {
        Entry {
            id: 1,
            uuid,
            entry_type: EntryType::Journal,
            title: "hello".into(),
            blocks: vec![],
            tags: vec![],
            attachments: vec![],
            is_favorite: false,
            is_pinned: false,
            archived_at: None,
            agent_id: None,
            created_at: 1,
            updated_at: 1,
            sync_status: SyncStatus::Pending,
            server_updated_at: None,
            last_synced_at: None,
        }
    }

    fn manager(entry_store: Arc<InMemoryEntryStore>) -> SyncManager<InMemoryEntryStore, InMemoryQueueStore> {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(crate::crypto::generate_key());
        std::env::set_var("JOURNAL_DEV_UEK", encoded);
        SyncManager::new(
            entry_store,
            Arc::new(SyncQueue::new(InMemoryQueueStore::new())),
            Arc::new(SyncClient::new("https://sync.example.com")),
            KeyManager::new(true),
            reqwest::Client::new(),
            "https://sync.example.com",
            Uuid::new_v4(),
        )
    }

    #[tokio::test]
    async fn entry_created_enqueues_a_create() {
        let store = Arc::new(InMemoryEntryStore::new());
        let uuid = Uuid::new_v4();
        let entry = sample_entry(uuid);
        store.seed(entry.clone());
        let mgr = manager(store);

        mgr.entry_created(&entry).await.unwrap();
        let stats = mgr.queue.get_stats().await.unwrap();
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn apply_incoming_delete_removes_local_row() {
        let store = Arc::new(InMemoryEntryStore::new());
        let uuid = Uuid::new_v4();
        store.seed(sample_entry(uuid));
        let mgr = manager(store.clone());

        mgr.apply_incoming(uuid, &dummy_envelope(mgr.user_id), 999, true).await.unwrap();
        assert!(store.get_by_uuid(uuid).await.unwrap().is_none());
    }

    fn dummy_envelope(user_id: Uuid) -> EncryptedEnvelope {
        EncryptedEnvelope {
            ciphertext: String::new(),
            nonce: String::new(),
            auth_tag: String::new(),
            wrapped_key: crate::wire::WrappedKey {
                user_id,
                wrapped_dek: String::new(),
                dek_nonce: String::new(),
                dek_auth_tag: String::new(),
            },
            version: 2,
        }
    }
}
