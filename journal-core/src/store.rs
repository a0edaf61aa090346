//! Abstract storage the sync core reads and writes through.
//!
//! Grounded on the teacher's `sync::bucket::SyncBucketClient` (an
//! `#[async_trait]` trait documented method-by-method, implemented by a real
//! backend and by an in-memory fake for tests) and `storage::traits::ReleaseStorage`
//! (trait + concrete impl pairing). The sync core never opens the on-disk
//! journal database or the platform keychain directly -- it only ever talks
//! to these trait objects, so the host app supplies the concrete
//! implementation.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::entry::{Entry, SyncStatus};
use crate::error::ErrorKind;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no entry with uuid {0}")]
    NotFound(Uuid),
    #[error("backing store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::ProtocolViolation,
            StoreError::Backend(_) => ErrorKind::Transient,
        }
    }
}

/// Fields the sync core is allowed to write back after applying a remote
/// update, an initial pull, or marking a local push as synced.
#[derive(Debug, Clone)]
pub struct ApplyRemote {
    pub title: Option<String>,
    pub blocks: Option<Vec<crate::entry::Block>>,
    pub tags: Option<Vec<String>>,
    pub is_favorite: Option<bool>,
    pub is_pinned: Option<bool>,
    pub archived_at: Option<Option<i64>>,
    pub agent_id: Option<Option<String>>,
    pub attachments: Option<Vec<Uuid>>,
    pub updated_at: i64,
    pub sync_status: SyncStatus,
}

/// Abstracts over the on-disk journal database. The sync core only ever
/// reads/writes the columns named in the data model -- it has no opinion on
/// schema, migrations, or any column the editor owns.
#[async_trait]
pub trait EntryStore: Send + Sync {
    async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<Entry>, StoreError>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Entry>, StoreError>;

    /// All local uuids with their `updated_at`, for manifest diffing.
    async fn list_uuids_with_updated_at(&self) -> Result<Vec<(Uuid, i64)>, StoreError>;

    /// Insert a new local row from a server-only pull. `sync_status` is
    /// always `Synced` for rows created this way.
    async fn insert_from_remote(&self, uuid: Uuid, fields: ApplyRemote) -> Result<i64, StoreError>;

    /// Apply a decrypted remote update to an existing row. Only fields
    /// present in `fields` are written.
    async fn apply_remote(&self, uuid: Uuid, fields: ApplyRemote) -> Result<(), StoreError>;

    async fn mark_deleted_locally(&self, uuid: Uuid) -> Result<(), StoreError>;

    async fn set_sync_status(&self, uuid: Uuid, status: SyncStatus) -> Result<(), StoreError>;

    async fn set_server_updated_at(&self, uuid: Uuid, server_updated_at: i64) -> Result<(), StoreError>;
}

/// Abstracts over the platform keychain for everything that is not the UEK
/// itself (which `KeyManager` already owns): cached access tokens, the
/// refresh token, and the stored `server_url`/`email` pairing.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

#[cfg(any(test, feature = "test-utils"))]
pub mod fakes {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryEntryStore {
        entries: Mutex<HashMap<Uuid, Entry>>,
        next_id: Mutex<i64>,
    }

    impl InMemoryEntryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed(&self, entry: Entry) {
            self.entries.lock().unwrap().insert(entry.uuid, entry);
        }
    }

    fn apply_fields(entry: &mut Entry, fields: ApplyRemote) {
        if let Some(title) = fields.title {
            entry.title = title;
        }
        if let Some(blocks) = fields.blocks {
            entry.blocks = blocks;
        }
        if let Some(tags) = fields.tags {
            entry.tags = tags;
        }
        if let Some(v) = fields.is_favorite {
            entry.is_favorite = v;
        }
        if let Some(v) = fields.is_pinned {
            entry.is_pinned = v;
        }
        if let Some(v) = fields.archived_at {
            entry.archived_at = v;
        }
        if let Some(v) = fields.agent_id {
            entry.agent_id = v;
        }
        if let Some(v) = fields.attachments {
            entry.attachments = v;
        }
        entry.updated_at = fields.updated_at;
        entry.sync_status = fields.sync_status;
    }

    #[async_trait]
    impl EntryStore for InMemoryEntryStore {
        async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<Entry>, StoreError> {
            Ok(self.entries.lock().unwrap().get(&uuid).cloned())
        }

        async fn get_by_id(&self, id: i64) -> Result<Option<Entry>, StoreError> {
            Ok(self.entries.lock().unwrap().values().find(|e| e.id == id).cloned())
        }

        async fn list_uuids_with_updated_at(&self) -> Result<Vec<(Uuid, i64)>, StoreError> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .values()
                .map(|e| (e.uuid, e.updated_at))
                .collect())
        }

        async fn insert_from_remote(&self, uuid: Uuid, fields: ApplyRemote) -> Result<i64, StoreError> {
            let mut next_id = self.next_id.lock().unwrap();
            *next_id += 1;
            let id = *next_id;
            let mut entry = Entry {
                id,
                uuid,
                entry_type: crate::entry::EntryType::Journal,
                title: String::new(),
                blocks: vec![],
                tags: vec![],
                attachments: vec![],
                is_favorite: false,
                is_pinned: false,
                archived_at: None,
                agent_id: None,
                created_at: fields.updated_at,
                updated_at: fields.updated_at,
                sync_status: SyncStatus::Synced,
                server_updated_at: Some(fields.updated_at),
                last_synced_at: Some(fields.updated_at),
            };
            apply_fields(&mut entry, fields);
            self.entries.lock().unwrap().insert(uuid, entry);
            Ok(id)
        }

        async fn apply_remote(&self, uuid: Uuid, fields: ApplyRemote) -> Result<(), StoreError> {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries.get_mut(&uuid).ok_or(StoreError::NotFound(uuid))?;
            apply_fields(entry, fields);
            Ok(())
        }

        async fn mark_deleted_locally(&self, uuid: Uuid) -> Result<(), StoreError> {
            self.entries.lock().unwrap().remove(&uuid);
            Ok(())
        }

        async fn set_sync_status(&self, uuid: Uuid, status: SyncStatus) -> Result<(), StoreError> {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries.get_mut(&uuid).ok_or(StoreError::NotFound(uuid))?;
            entry.sync_status = status;
            Ok(())
        }

        async fn set_server_updated_at(&self, uuid: Uuid, server_updated_at: i64) -> Result<(), StoreError> {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries.get_mut(&uuid).ok_or(StoreError::NotFound(uuid))?;
            entry.server_updated_at = Some(server_updated_at);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct InMemorySecretStore {
        values: Mutex<HashMap<String, String>>,
    }

    impl InMemorySecretStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl SecretStore for InMemorySecretStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            Ok(self.values.lock().unwrap().get(key).cloned())
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.values.lock().unwrap().insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.values.lock().unwrap().remove(key);
            Ok(())
        }
    }
}
