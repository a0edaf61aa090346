//! Maps between an `EncryptedEnvelope` and a CRDT document.
//!
//! The teacher has no CRDT library of its own -- its sync engine replicates
//! SQLite session changesets over S3, which is a fundamentally different
//! mechanism. `yrs` (the Rust port of the Yjs CRDT) is pulled in from the
//! wider example pack for this one concern: it provides exactly the
//! primitives the journal document needs (a keyed map, causal merge, compact
//! binary state, incremental updates, transactions) and nothing the journal
//! doesn't use (text/rich-sequence CRDTs, awareness/presence) goes anywhere
//! near this module.
//!
//! For an E2EE document only `metadata` is populated; `blocks` (an ordered
//! CRDT sequence) exists on the document type for parity with a future
//! non-encrypted collaborative mode but is unused here.

use thiserror::Error;
use uuid::Uuid;
use yrs::{Any, Array, ArrayRef, Doc, Map, MapRef, ReadTxn, StateVector, Transact, Update};

use crate::error::ErrorKind;
use crate::wire::{EncryptedEnvelope, WrappedKey};

#[derive(Error, Debug)]
pub enum CrdtError {
    #[error("failed to decode CRDT update: {0}")]
    DecodeUpdate(String),
    #[error("metadata map was missing required field {0}")]
    MissingField(&'static str),
    #[error("metadata field {0} had the wrong type")]
    WrongType(&'static str),
}

impl CrdtError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CrdtError::DecodeUpdate(_) => ErrorKind::ProtocolViolation,
            CrdtError::MissingField(_) | CrdtError::WrongType(_) => ErrorKind::Corruption,
        }
    }
}

/// The decrypted-envelope-adjacent view of a document's metadata: everything
/// needed to decide push/pull/no-op without touching the UEK.
#[derive(Debug, Clone)]
pub struct DocMetadata {
    pub envelope: EncryptedEnvelope,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted: bool,
}

/// One entry's live CRDT document.
pub struct CrdtDocument {
    pub doc: Doc,
    metadata: MapRef,
    #[allow(dead_code)]
    blocks: ArrayRef,
    last_observed_updated_at: i64,
}

impl CrdtDocument {
    pub fn new() -> Self {
        let doc = Doc::new();
        let metadata = doc.get_or_insert_map("metadata");
        let blocks = doc.get_or_insert_array("blocks");
        Self {
            doc,
            metadata,
            blocks,
            last_observed_updated_at: 0,
        }
    }

    /// Write the envelope and public timestamps into `metadata` inside a
    /// single transaction.
    pub fn write_encrypted(&self, envelope: &EncryptedEnvelope, created_at: i64, updated_at: i64) {
        let mut txn = self.doc.transact_mut();
        self.metadata.insert(&mut txn, "encrypted", true);
        self.metadata.insert(&mut txn, "version", envelope.version as f64);
        self.metadata
            .insert(&mut txn, "ciphertext", envelope.ciphertext.clone());
        self.metadata.insert(&mut txn, "nonce", envelope.nonce.clone());
        self.metadata
            .insert(&mut txn, "auth_tag", envelope.auth_tag.clone());
        self.metadata.insert(
            &mut txn,
            "wrapped_key_user_id",
            envelope.wrapped_key.user_id.to_string(),
        );
        self.metadata
            .insert(&mut txn, "wrapped_dek", envelope.wrapped_key.wrapped_dek.clone());
        self.metadata
            .insert(&mut txn, "dek_nonce", envelope.wrapped_key.dek_nonce.clone());
        self.metadata
            .insert(&mut txn, "dek_auth_tag", envelope.wrapped_key.dek_auth_tag.clone());
        self.metadata.insert(&mut txn, "created_at", created_at as f64);
        self.metadata.insert(&mut txn, "updated_at", updated_at as f64);
        self.metadata.insert(&mut txn, "deleted", false);
    }

    pub fn mark_deleted(&self, updated_at: i64) {
        let mut txn = self.doc.transact_mut();
        self.metadata.insert(&mut txn, "deleted", true);
        self.metadata.insert(&mut txn, "updated_at", updated_at as f64);
    }

    /// Read back the current metadata, or `None` if the document has never
    /// been written to (a freshly-connected empty document before the first
    /// sync completes).
    pub fn read_encrypted(&self) -> Result<Option<DocMetadata>, CrdtError> {
        let txn = self.doc.transact();

        let get_str = |field: &'static str| -> Result<String, CrdtError> {
            match self.metadata.get(&txn, field) {
                Some(yrs::Value::Any(Any::String(s))) => Ok(s.to_string()),
                Some(_) => Err(CrdtError::WrongType(field)),
                None => Err(CrdtError::MissingField(field)),
            }
        };
        let get_f64 = |field: &'static str| -> Result<f64, CrdtError> {
            match self.metadata.get(&txn, field) {
                Some(yrs::Value::Any(Any::Number(n))) => Ok(n),
                Some(_) => Err(CrdtError::WrongType(field)),
                None => Err(CrdtError::MissingField(field)),
            }
        };
        let get_bool = |field: &'static str| -> Result<bool, CrdtError> {
            match self.metadata.get(&txn, field) {
                Some(yrs::Value::Any(Any::Bool(b))) => Ok(b),
                Some(_) => Err(CrdtError::WrongType(field)),
                None => Err(CrdtError::MissingField(field)),
            }
        };

        if self.metadata.get(&txn, "encrypted").is_none() {
            return Ok(None);
        }

        let user_id_str = get_str("wrapped_key_user_id")?;
        let user_id = Uuid::parse_str(&user_id_str)
            .map_err(|_| CrdtError::WrongType("wrapped_key_user_id"))?;

        let envelope = EncryptedEnvelope {
            ciphertext: get_str("ciphertext")?,
            nonce: get_str("nonce")?,
            auth_tag: get_str("auth_tag")?,
            wrapped_key: WrappedKey {
                user_id,
                wrapped_dek: get_str("wrapped_dek")?,
                dek_nonce: get_str("dek_nonce")?,
                dek_auth_tag: get_str("dek_auth_tag")?,
            },
            version: get_f64("version")? as u32,
        };

        Ok(Some(DocMetadata {
            envelope,
            created_at: get_f64("created_at")? as i64,
            updated_at: get_f64("updated_at")? as i64,
            deleted: get_bool("deleted")?,
        }))
    }

    /// Full current state, for the initial sync response or a from-scratch
    /// snapshot persisted server-side.
    pub fn encode_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Apply a binary update received from a peer or loaded from storage.
    pub fn apply_update(&self, bytes: &[u8]) -> Result<(), CrdtError> {
        let update = Update::decode_v1(bytes).map_err(|e| CrdtError::DecodeUpdate(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| CrdtError::DecodeUpdate(e.to_string()))
    }

    /// Suppresses callbacks for updates the document has already surfaced
    /// (including echoes of its own just-applied local transaction), per the
    /// `last_seen_updated_at` floor.
    pub fn should_surface(&mut self, candidate_updated_at: i64) -> bool {
        if candidate_updated_at <= self.last_observed_updated_at {
            return false;
        }
        self.last_observed_updated_at = candidate_updated_at;
        true
    }
}

impl Default for CrdtDocument {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;

    fn sample_envelope() -> EncryptedEnvelope {
        EncryptedEnvelope {
            ciphertext: "Y2lwaGVy".into(),
            nonce: "bm9uY2U".into(),
            auth_tag: "dGFn".into(),
            wrapped_key: WrappedKey {
                user_id: Uuid::new_v4(),
                wrapped_dek: "d2Rlaw".into(),
                dek_nonce: "ZG5vbmNl".into(),
                dek_auth_tag: "ZHRhZw".into(),
            },
            version: 2,
        }
    }

    #[test]
    fn empty_document_reads_as_none() {
        let doc = CrdtDocument::new();
        assert!(doc.read_encrypted().unwrap().is_none());
    }

    #[test]
    fn write_then_read_round_trip() {
        let doc = CrdtDocument::new();
        let envelope = sample_envelope();
        doc.write_encrypted(&envelope, 100, 100);
        let state = doc.read_encrypted().unwrap().unwrap();
        assert_eq!(state.envelope, envelope);
        assert_eq!(state.created_at, 100);
        assert_eq!(state.updated_at, 100);
        assert!(!state.deleted);
    }

    #[test]
    fn mark_deleted_bumps_timestamp() {
        let doc = CrdtDocument::new();
        doc.write_encrypted(&sample_envelope(), 100, 100);
        doc.mark_deleted(200);
        let state = doc.read_encrypted().unwrap().unwrap();
        assert!(state.deleted);
        assert_eq!(state.updated_at, 200);
    }

    #[test]
    fn replicates_via_binary_update() {
        let a = CrdtDocument::new();
        a.write_encrypted(&sample_envelope(), 100, 100);
        let snapshot = a.encode_state();

        let b = CrdtDocument::new();
        b.apply_update(&snapshot).unwrap();
        let state = b.read_encrypted().unwrap().unwrap();
        assert_eq!(state.created_at, 100);
    }

    #[test]
    fn observer_floor_suppresses_echoes() {
        let mut doc = CrdtDocument::new();
        assert!(doc.should_surface(100));
        assert!(!doc.should_surface(100));
        assert!(!doc.should_surface(50));
        assert!(doc.should_surface(150));
    }

    #[test]
    fn crypto_envelope_roundtrips_through_the_doc() {
        let uek = crypto::generate_key();
        let user = Uuid::new_v4();
        let synced = crate::entry::SyncedFields {
            agent_id: None,
            archived_at: None,
            attachments: vec![],
            blocks: vec![],
            is_favorite: false,
            is_pinned: false,
            tags: vec![],
            title: "doc-backed".into(),
            entry_type: crate::entry::EntryType::Journal,
        };
        let envelope = crate::codec::encrypt_entry(&synced, user, &uek).unwrap();

        let doc = CrdtDocument::new();
        doc.write_encrypted(&envelope, 1, 1);
        let state = doc.read_encrypted().unwrap().unwrap();

        let decoded = crate::codec::decrypt_entry(&state.envelope, user, &uek).unwrap();
        assert_eq!(decoded, synced);
    }
}
