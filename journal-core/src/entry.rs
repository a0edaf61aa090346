//! The canonical plaintext journal entry and its content blocks.
//!
//! The sync core treats block `text`/`checked` fields opaquely: it encrypts
//! them as part of the entry JSON but never interprets markdown or rich-text
//! semantics, which belongs to the editor.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Journal,
    Chat,
    Countdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Modified,
    Synced,
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Paragraph,
    Heading,
    ChecklistItem,
    ImageRef,
    Code,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: Uuid,
    pub kind: BlockKind,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub checked: Option<bool>,
    pub order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub uuid: Uuid,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub title: String,
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<Uuid>,
    pub is_favorite: bool,
    pub is_pinned: bool,
    #[serde(default)]
    pub archived_at: Option<i64>,
    #[serde(default)]
    pub agent_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub sync_status: SyncStatus,
    #[serde(default)]
    pub server_updated_at: Option<i64>,
    #[serde(default)]
    pub last_synced_at: Option<i64>,
}

/// The subset of an `Entry` that actually crosses the wire inside an
/// encrypted envelope. `id`, `sync_status`, `server_updated_at`, and
/// `last_synced_at` are local bookkeeping and never leave the device.
///
/// Fields are declared in a fixed order (alphabetical within the struct) so
/// that two calls encrypting byte-identical plaintexts produce byte-identical
/// JSON before encryption -- useful for crypto round-trip tests, even though
/// the ciphertext itself never repeats because of the fresh nonce.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncedFields {
    pub agent_id: Option<String>,
    pub archived_at: Option<i64>,
    pub attachments: Vec<Uuid>,
    pub blocks: Vec<Block>,
    pub is_favorite: bool,
    pub is_pinned: bool,
    pub tags: Vec<String>,
    pub title: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
}

impl From<&Entry> for SyncedFields {
    fn from(e: &Entry) -> Self {
        SyncedFields {
            agent_id: e.agent_id.clone(),
            archived_at: e.archived_at,
            attachments: e.attachments.clone(),
            blocks: e.blocks.clone(),
            is_favorite: e.is_favorite,
            is_pinned: e.is_pinned,
            tags: e.tags.clone(),
            title: e.title.clone(),
            entry_type: e.entry_type,
        }
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.kind == other.kind
            && self.text == other.text
            && self.checked == other.checked
            && self.order == other.order
    }
}
