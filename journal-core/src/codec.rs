//! Turns a plaintext `Entry` into an `EncryptedEnvelope` and back.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use thiserror::Error;
use uuid::Uuid;

use crate::crypto::{self, CryptoError, NONCE_LEN, TAG_LEN};
use crate::entry::SyncedFields;
use crate::error::ErrorKind;
use crate::wire::{EncryptedEnvelope, WrappedKey, ENVELOPE_VERSION};

#[derive(Error, Debug)]
pub enum CodecError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("base64 field was malformed: {0}")]
    Base64(String),
    #[error("envelope was wrapped for a different user")]
    WrongRecipient,
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u32),
}

impl CodecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CodecError::Crypto(e) => e.kind(),
            CodecError::Json(_) => ErrorKind::Corruption,
            CodecError::Base64(_) => ErrorKind::Corruption,
            CodecError::WrongRecipient => ErrorKind::AccessDenied,
            CodecError::UnsupportedVersion(_) => ErrorKind::ProtocolViolation,
        }
    }
}

fn decode_fixed<const N: usize>(field: &str, value: &str) -> Result<[u8; N], CodecError> {
    let bytes = B64
        .decode(value)
        .map_err(|e| CodecError::Base64(format!("{field}: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| CodecError::Base64(format!("{field}: wrong length")))
}

/// Encrypt the synced subset of `entry` for `owner_user_id`, generating a
/// fresh DEK and wrapping it with `uek`.
pub fn encrypt_entry(
    synced: &SyncedFields,
    owner_user_id: Uuid,
    uek: &[u8],
) -> Result<EncryptedEnvelope, CodecError> {
    let plaintext = serde_json::to_vec(synced)?;
    let dek = crypto::generate_key();
    let sealed = crypto::seal(&dek, &plaintext)?;
    let wrapped = crypto::wrap_key(uek, &dek)?;

    Ok(EncryptedEnvelope {
        ciphertext: B64.encode(sealed.ciphertext),
        nonce: B64.encode(sealed.nonce),
        auth_tag: B64.encode(sealed.tag),
        wrapped_key: WrappedKey {
            user_id: owner_user_id,
            wrapped_dek: B64.encode(wrapped.ciphertext),
            dek_nonce: B64.encode(wrapped.nonce),
            dek_auth_tag: B64.encode(wrapped.tag),
        },
        version: ENVELOPE_VERSION,
    })
}

/// Decrypt `envelope`, verifying it was wrapped for `current_user_id`.
pub fn decrypt_entry(
    envelope: &EncryptedEnvelope,
    current_user_id: Uuid,
    uek: &[u8],
) -> Result<SyncedFields, CodecError> {
    if envelope.version != ENVELOPE_VERSION {
        return Err(CodecError::UnsupportedVersion(envelope.version));
    }
    if envelope.wrapped_key.user_id != current_user_id {
        return Err(CodecError::WrongRecipient);
    }

    let wrapped_dek = B64
        .decode(&envelope.wrapped_key.wrapped_dek)
        .map_err(|e| CodecError::Base64(format!("wrapped_dek: {e}")))?;
    let dek_nonce: [u8; NONCE_LEN] = decode_fixed("dek_nonce", &envelope.wrapped_key.dek_nonce)?;
    let dek_tag: [u8; TAG_LEN] = decode_fixed("dek_auth_tag", &envelope.wrapped_key.dek_auth_tag)?;
    let dek = crypto::unwrap_key(uek, &wrapped_dek, &dek_nonce, &dek_tag)?;

    let ciphertext = B64
        .decode(&envelope.ciphertext)
        .map_err(|e| CodecError::Base64(format!("ciphertext: {e}")))?;
    let nonce: [u8; NONCE_LEN] = decode_fixed("nonce", &envelope.nonce)?;
    let tag: [u8; TAG_LEN] = decode_fixed("auth_tag", &envelope.auth_tag)?;
    let plaintext = crypto::open(&dek, &ciphertext, &nonce, &tag)?;

    Ok(serde_json::from_slice(&plaintext)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Block, BlockKind, EntryType};

    fn sample() -> SyncedFields {
        SyncedFields {
            agent_id: None,
            archived_at: None,
            attachments: vec![],
            blocks: vec![Block {
                id: Uuid::new_v4(),
                kind: BlockKind::Paragraph,
                text: Some("hello".into()),
                checked: None,
                order: 0,
            }],
            is_favorite: false,
            is_pinned: true,
            tags: vec!["diary".into()],
            title: "today".into(),
            entry_type: EntryType::Journal,
        }
    }

    #[test]
    fn round_trip() {
        let uek = crypto::generate_key();
        let user = Uuid::new_v4();
        let synced = sample();
        let envelope = encrypt_entry(&synced, user, &uek).unwrap();
        let decoded = decrypt_entry(&envelope, user, &uek).unwrap();
        assert_eq!(decoded, synced);
    }

    #[test]
    fn wrong_user_rejected() {
        let uek = crypto::generate_key();
        let envelope = encrypt_entry(&sample(), Uuid::new_v4(), &uek).unwrap();
        let err = decrypt_entry(&envelope, Uuid::new_v4(), &uek).unwrap_err();
        assert!(matches!(err, CodecError::WrongRecipient));
    }

    #[test]
    fn unsupported_version_rejected() {
        let uek = crypto::generate_key();
        let user = Uuid::new_v4();
        let mut envelope = encrypt_entry(&sample(), user, &uek).unwrap();
        envelope.version = 1;
        let err = decrypt_entry(&envelope, user, &uek).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedVersion(1)));
    }
}
