//! Shared error taxonomy.
//!
//! Every fallible component defines its own `thiserror` enum scoped to what it
//! can actually fail at, then implements `kind()` so callers that only care
//! about retry/surface policy (the queue worker, the asset worker, the sync
//! manager) can dispatch without matching every concrete variant.

use thiserror::Error;

/// The abstract failure categories the rest of the system reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network hiccup, timeout, 5xx. Retry with backoff.
    Transient,
    /// Invalid/expired token, wrong password, invalid refresh token. Surface, halt.
    AuthFailure,
    /// Wrapped key for another user, document owned by someone else. Never retry.
    AccessDenied,
    /// AEAD tag failed to verify, envelope malformed. Fatal for this entry.
    Corruption,
    /// Malformed uuid, manifest, or wire message. Drop with audit.
    ProtocolViolation,
    /// Rate limited. Backoff and retry later.
    Capacity,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::Capacity)
    }
}

/// Top-level error returned by `SyncManager` entry points, aggregating the
/// per-component errors so callers that just want "did sync work" don't need
/// to know which subsystem failed.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Crypto(#[from] crate::crypto::CryptoError),
    #[error(transparent)]
    Key(#[from] crate::keys::KeyError),
    #[error(transparent)]
    Codec(#[from] crate::codec::CodecError),
    #[error(transparent)]
    Queue(#[from] crate::queue::QueueError),
    #[error(transparent)]
    Client(#[from] crate::sync_client::SyncClientError),
    #[error(transparent)]
    Token(#[from] crate::tokens::TokenError),
    #[error(transparent)]
    Asset(#[from] crate::assets::AssetError),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Crypto(e) => e.kind(),
            SyncError::Key(e) => e.kind(),
            SyncError::Codec(e) => e.kind(),
            SyncError::Queue(e) => e.kind(),
            SyncError::Client(e) => e.kind(),
            SyncError::Token(e) => e.kind(),
            SyncError::Asset(e) => e.kind(),
        }
    }
}
