//! Manages the user encryption key (UEK) with lazy reads from the platform
//! secure store.
//!
//! Grounded on the teacher's `KeyService`: dev-mode falls back to an
//! environment variable so tests and CI can round-trip without a real
//! keyring, and reads are lazy because the OS keychain can trigger a system
//! prompt on first access.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use thiserror::Error;
use tracing::{info, warn};

use crate::crypto::{self, CryptoError, DEK_LEN, NONCE_LEN, SALT_LEN, TAG_LEN};
use crate::error::ErrorKind;
use crate::wire::{UekRecordDto, UekRegistration};

const SERVICE: &str = "journal";
const ACCOUNT_UEK: &str = "user_encryption_key";
const ACCOUNT_VERSION: &str = "user_encryption_key_version";
const ENV_UEK: &str = "JOURNAL_DEV_UEK";
const ENV_VERSION: &str = "JOURNAL_DEV_UEK_VERSION";

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("keyring error: {0}")]
    Keyring(#[from] keyring_core::Error),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("stored key material was malformed: {0}")]
    Malformed(String),
    #[error("wrong password or corrupted key blob")]
    WrongPasswordOrCorrupt,
    #[error("no UEK is present for this account")]
    NotPresent,
}

impl KeyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KeyError::Keyring(_) => ErrorKind::Transient,
            KeyError::Crypto(e) => e.kind(),
            KeyError::Malformed(_) => ErrorKind::Corruption,
            KeyError::WrongPasswordOrCorrupt => ErrorKind::AuthFailure,
            KeyError::NotPresent => ErrorKind::AuthFailure,
        }
    }
}

/// The registration-time output: what goes to the server (opaque) and what
/// stays on the device (the cleartext UEK).
pub struct NewUek {
    pub registration: UekRegistration,
    pub uek: [u8; DEK_LEN],
}

/// Manages the lifecycle of the per-user UEK: derive from password, wrap for
/// the server, unwrap on login, and cache locally in the platform secure
/// store.
#[derive(Clone)]
pub struct KeyManager {
    dev_mode: bool,
}

impl KeyManager {
    pub fn new(dev_mode: bool) -> Self {
        Self { dev_mode }
    }

    fn local_uek_raw(&self) -> Option<String> {
        if self.dev_mode {
            std::env::var(ENV_UEK).ok().filter(|v| !v.is_empty())
        } else {
            keyring_core::Entry::new(SERVICE, ACCOUNT_UEK)
                .ok()
                .and_then(|e| e.get_password().ok())
                .filter(|v| !v.is_empty())
        }
    }

    pub fn has_uek(&self) -> bool {
        self.local_uek_raw().is_some()
    }

    /// Generate a brand-new UEK for account registration. Returns both the
    /// opaque blob to send to the server and the cleartext key to keep
    /// locally -- callers must still call [`KeyManager::store_uek`].
    pub fn create_uek_for_registration(password: &str) -> NewUek {
        let uek = crypto::generate_key();
        let salt = crypto::generate_salt();
        let kek = crypto::derive_kek(password, &salt);
        let wrapped = crypto::wrap_key(&kek, &uek).expect("wrapping a freshly generated key cannot fail");

        NewUek {
            registration: UekRegistration {
                wrapped_uek: B64.encode(wrapped.ciphertext),
                salt: B64.encode(salt),
                nonce: B64.encode(wrapped.nonce),
                auth_tag: B64.encode(wrapped.tag),
            },
            uek,
        }
    }

    /// Re-derive the KEK from `password` and unwrap the UEK shipped by the
    /// server at login. A failure here is fatal for this login attempt: wrong
    /// password or a corrupted blob look identical from the outside.
    pub fn unwrap_uek_for_login(
        password: &str,
        record: &UekRecordDto,
    ) -> Result<[u8; DEK_LEN], KeyError> {
        let salt: [u8; SALT_LEN] = B64
            .decode(&record.salt)
            .map_err(|e| KeyError::Malformed(format!("salt: {e}")))?
            .try_into()
            .map_err(|_| KeyError::Malformed("salt wrong length".into()))?;
        let wrapped = B64
            .decode(&record.wrapped_uek)
            .map_err(|e| KeyError::Malformed(format!("wrapped_uek: {e}")))?;
        let nonce: [u8; NONCE_LEN] = B64
            .decode(&record.nonce)
            .map_err(|e| KeyError::Malformed(format!("nonce: {e}")))?
            .try_into()
            .map_err(|_| KeyError::Malformed("nonce wrong length".into()))?;
        let tag: [u8; TAG_LEN] = B64
            .decode(&record.auth_tag)
            .map_err(|e| KeyError::Malformed(format!("auth_tag: {e}")))?
            .try_into()
            .map_err(|_| KeyError::Malformed("auth_tag wrong length".into()))?;

        let kek = crypto::derive_kek(password, &salt);
        let uek = crypto::unwrap_key(&kek, &wrapped, &nonce, &tag)
            .map_err(|_| KeyError::WrongPasswordOrCorrupt)?;
        uek.try_into()
            .map_err(|_| KeyError::Malformed("unwrapped UEK wrong length".into()))
    }

    /// Persist the UEK in the platform secure store (or, in dev mode, an
    /// environment variable so tests can round-trip without a real keyring).
    pub fn store_uek(&self, uek: &[u8; DEK_LEN], version: u32) -> Result<(), KeyError> {
        let encoded = B64.encode(uek);
        if self.dev_mode {
            std::env::set_var(ENV_UEK, &encoded);
            std::env::set_var(ENV_VERSION, version.to_string());
        } else {
            keyring_core::Entry::new(SERVICE, ACCOUNT_UEK)?.set_password(&encoded)?;
            keyring_core::Entry::new(SERVICE, ACCOUNT_VERSION)?.set_password(&version.to_string())?;
        }
        info!(version, "stored UEK locally");
        Ok(())
    }

    pub fn get_uek(&self) -> Result<[u8; DEK_LEN], KeyError> {
        let raw = self.local_uek_raw().ok_or(KeyError::NotPresent)?;
        B64.decode(&raw)
            .map_err(|e| KeyError::Malformed(format!("{e}")))?
            .try_into()
            .map_err(|_| KeyError::Malformed("UEK wrong length".into()))
    }

    pub fn get_uek_version(&self) -> Option<u32> {
        let raw = if self.dev_mode {
            std::env::var(ENV_VERSION).ok()
        } else {
            keyring_core::Entry::new(SERVICE, ACCOUNT_VERSION)
                .ok()
                .and_then(|e| e.get_password().ok())
        };
        raw.and_then(|v| v.parse().ok())
    }

    /// True when the server has rotated the UEK wrapping (e.g. after a
    /// password change) and the locally cached version is behind.
    pub fn is_uek_stale(&self, server_version: u32) -> bool {
        self.get_uek_version().unwrap_or(0) < server_version
    }

    pub fn delete_uek(&self) -> Result<(), KeyError> {
        if self.dev_mode {
            std::env::remove_var(ENV_UEK);
            std::env::remove_var(ENV_VERSION);
            return Ok(());
        }
        for account in [ACCOUNT_UEK, ACCOUNT_VERSION] {
            match keyring_core::Entry::new(SERVICE, account)?.delete_credential() {
                Ok(()) => {}
                Err(keyring_core::Error::NoEntry) => {}
                Err(e) => return Err(KeyError::Keyring(e)),
            }
        }
        warn!("deleted local UEK");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_env() {
        std::env::remove_var(ENV_UEK);
        std::env::remove_var(ENV_VERSION);
    }

    #[test]
    fn registration_then_login_round_trip() {
        clear_env();
        let new_uek = KeyManager::create_uek_for_registration("hunter2hunter");
        let record = UekRecordDto {
            wrapped_uek: new_uek.registration.wrapped_uek.clone(),
            salt: new_uek.registration.salt.clone(),
            nonce: new_uek.registration.nonce.clone(),
            auth_tag: new_uek.registration.auth_tag.clone(),
            version: 1,
        };
        let unwrapped = KeyManager::unwrap_uek_for_login("hunter2hunter", &record).unwrap();
        assert_eq!(unwrapped, new_uek.uek);
    }

    #[test]
    fn wrong_password_fails() {
        clear_env();
        let new_uek = KeyManager::create_uek_for_registration("correct horse");
        let record = UekRecordDto {
            wrapped_uek: new_uek.registration.wrapped_uek,
            salt: new_uek.registration.salt,
            nonce: new_uek.registration.nonce,
            auth_tag: new_uek.registration.auth_tag,
            version: 1,
        };
        let result = KeyManager::unwrap_uek_for_login("wrong password", &record);
        assert!(matches!(result, Err(KeyError::WrongPasswordOrCorrupt)));
    }

    #[test]
    fn dev_mode_store_and_retrieve() {
        clear_env();
        let km = KeyManager::new(true);
        assert!(!km.has_uek());

        let new_uek = KeyManager::create_uek_for_registration("pw");
        km.store_uek(&new_uek.uek, 1).unwrap();

        assert!(km.has_uek());
        assert_eq!(km.get_uek().unwrap(), new_uek.uek);
        assert_eq!(km.get_uek_version(), Some(1));
        assert!(!km.is_uek_stale(1));
        assert!(km.is_uek_stale(2));

        km.delete_uek().unwrap();
        assert!(!km.has_uek());
        clear_env();
    }
}
