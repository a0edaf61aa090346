//! AES-256-GCM envelope crypto and PBKDF2 key derivation.
//!
//! Mirrors the teacher's `EncryptionService` (single-purpose wrapper around
//! one AEAD primitive, hex/base64 at the edges, `thiserror` for failures) but
//! splits encrypt/decrypt from the nonce and tag instead of concatenating
//! them, and adds the PBKDF2 password->KEK step the journal's key hierarchy
//! needs.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use thiserror::Error;

use crate::error::ErrorKind;

pub const DEK_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const SALT_LEN: usize = 32;
pub const PBKDF2_ITERATIONS: u32 = 600_000;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("ciphertext failed authentication")]
    TagMismatch,
    #[error("key material had the wrong length: expected {expected}, got {actual}")]
    WrongKeyLength { expected: usize, actual: usize },
    #[error("AEAD operation failed")]
    Aead,
}

impl CryptoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CryptoError::TagMismatch => ErrorKind::Corruption,
            CryptoError::WrongKeyLength { .. } => ErrorKind::ProtocolViolation,
            CryptoError::Aead => ErrorKind::Corruption,
        }
    }
}

/// Result of a single AEAD encryption: ciphertext, nonce, and tag kept apart
/// (the wire envelope stores them as distinct fields, not concatenated).
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
}

fn load_key(bytes: &[u8]) -> Result<Key<Aes256Gcm>, CryptoError> {
    if bytes.len() != DEK_LEN {
        return Err(CryptoError::WrongKeyLength {
            expected: DEK_LEN,
            actual: bytes.len(),
        });
    }
    Ok(*Key::<Aes256Gcm>::from_slice(bytes))
}

/// Generate a fresh 32-byte symmetric key (DEK or UEK).
pub fn generate_key() -> [u8; DEK_LEN] {
    let mut key = [0u8; DEK_LEN];
    rand::rng().fill_bytes(&mut key);
    key
}

pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce);
    nonce
}

pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit key-encryption-key from a password and salt.
/// 600,000 PBKDF2-HMAC-SHA256 iterations, matching current OWASP guidance.
pub fn derive_kek(password: &str, salt: &[u8; SALT_LEN]) -> [u8; DEK_LEN] {
    let mut kek = [0u8; DEK_LEN];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut kek);
    kek
}

/// Encrypt `plaintext` under `key`, generating a fresh nonce. The returned
/// ciphertext does not include the tag; callers that need the combined form
/// for transport should concatenate it themselves.
pub fn seal(key: &[u8], plaintext: &[u8]) -> Result<Sealed, CryptoError> {
    let cipher = Aes256Gcm::new(&load_key(key)?);
    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from_slice(&nonce_bytes);
    let mut combined = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: &[],
            },
        )
        .map_err(|_| CryptoError::Aead)?;
    if combined.len() < TAG_LEN {
        return Err(CryptoError::Aead);
    }
    let tag_start = combined.len() - TAG_LEN;
    let tag_bytes = combined.split_off(tag_start);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&tag_bytes);
    Ok(Sealed {
        ciphertext: combined,
        nonce: nonce_bytes,
        tag,
    })
}

/// Decrypt a ciphertext/nonce/tag triple produced by [`seal`]. Fails with
/// [`CryptoError::TagMismatch`] on any bit flip in ciphertext, nonce, or tag.
pub fn open(
    key: &[u8],
    ciphertext: &[u8],
    nonce: &[u8; NONCE_LEN],
    tag: &[u8; TAG_LEN],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(&load_key(key)?);
    let mut combined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: &combined,
                aad: &[],
            },
        )
        .map_err(|_| CryptoError::TagMismatch)
}

/// Wrap a DEK (or UEK) under a wrapping key, producing the triple the wire
/// envelope persists as `wrapped_*`, `*_nonce`, `*_auth_tag`.
pub fn wrap_key(wrapping_key: &[u8], material: &[u8]) -> Result<Sealed, CryptoError> {
    seal(wrapping_key, material)
}

pub fn unwrap_key(
    wrapping_key: &[u8],
    wrapped: &[u8],
    nonce: &[u8; NONCE_LEN],
    tag: &[u8; TAG_LEN],
) -> Result<Vec<u8>, CryptoError> {
    open(wrapping_key, wrapped, nonce, tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let key = generate_key();
        let sealed = seal(&key, b"hello journal").unwrap();
        let plain = open(&key, &sealed.ciphertext, &sealed.nonce, &sealed.tag).unwrap();
        assert_eq!(plain, b"hello journal");
    }

    #[test]
    fn distinct_nonces_and_ciphertexts() {
        let key = generate_key();
        let a = seal(&key, b"same plaintext").unwrap();
        let b = seal(&key, b"same plaintext").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn bit_flip_in_ciphertext_rejected() {
        let key = generate_key();
        let mut sealed = seal(&key, b"integrity matters").unwrap();
        sealed.ciphertext[0] ^= 0x01;
        assert!(open(&key, &sealed.ciphertext, &sealed.nonce, &sealed.tag).is_err());
    }

    #[test]
    fn bit_flip_in_tag_rejected() {
        let key = generate_key();
        let mut sealed = seal(&key, b"integrity matters").unwrap();
        sealed.tag[0] ^= 0x01;
        assert!(open(&key, &sealed.ciphertext, &sealed.nonce, &sealed.tag).is_err());
    }

    #[test]
    fn bit_flip_in_nonce_rejected() {
        let key = generate_key();
        let mut sealed = seal(&key, b"integrity matters").unwrap();
        sealed.nonce[0] ^= 0x01;
        assert!(open(&key, &sealed.ciphertext, &sealed.nonce, &sealed.tag).is_err());
    }

    #[test]
    fn kek_derivation_is_deterministic_for_same_salt() {
        let salt = generate_salt();
        let a = derive_kek("hunter2hunter", &salt);
        let b = derive_kek("hunter2hunter", &salt);
        assert_eq!(a, b);
    }

    #[test]
    fn kek_derivation_differs_across_salts() {
        let a = derive_kek("hunter2hunter", &generate_salt());
        let b = derive_kek("hunter2hunter", &generate_salt());
        assert_ne!(a, b);
    }

    #[test]
    fn wrap_unwrap_round_trip() {
        let uek = generate_key();
        let dek = generate_key();
        let wrapped = wrap_key(&uek, &dek).unwrap();
        let unwrapped = unwrap_key(&uek, &wrapped.ciphertext, &wrapped.nonce, &wrapped.tag).unwrap();
        assert_eq!(unwrapped, dek);
    }
}
