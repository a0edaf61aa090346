//! Access/refresh token lifecycle.
//!
//! Grounded on the teacher's `bae_cloud_api` REST client (reqwest, bearer
//! auth, `api_url()` env-var override) but with a typed error taxonomy
//! instead of `Result<T, String>`, and single-flight refresh so concurrent
//! callers awaiting `get_valid_access_token` don't each fire their own
//! refresh request.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::error::ErrorKind;
use crate::wire::{RefreshRequest, RefreshResponse};

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("network error talking to auth server: {0}")]
    Network(#[from] reqwest::Error),
    #[error("session expired, refresh token is no longer valid")]
    SessionExpired,
    #[error("no tokens have been stored for this session")]
    NotAuthenticated,
}

impl TokenError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TokenError::Network(_) => ErrorKind::Transient,
            TokenError::SessionExpired => ErrorKind::AuthFailure,
            TokenError::NotAuthenticated => ErrorKind::AuthFailure,
        }
    }
}

struct Tokens {
    access_token: String,
    refresh_token: String,
    /// epoch millis the access token expires at.
    expires_at: i64,
}

/// Keeps the access token in memory only; the refresh token is expected to
/// be persisted by the caller through `SecretStore` (this type just holds
/// the working copy needed to perform a refresh).
pub struct TokenManager {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<Mutex<Option<Tokens>>>,
}

impl TokenManager {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            tokens: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn store_auth_tokens(&self, access_token: String, refresh_token: String, expires_in_s: i64, now_ms: i64) {
        let mut guard = self.tokens.lock().await;
        *guard = Some(Tokens {
            access_token,
            refresh_token,
            expires_at: now_ms + expires_in_s * 1000,
        });
    }

    pub async fn clear(&self) {
        *self.tokens.lock().await = None;
    }

    /// The proactive-refresh schedule: `min(ttl - 5min, 0.75 * ttl)` after
    /// the token was minted.
    pub fn proactive_refresh_delay(expires_in_s: i64) -> Duration {
        let ttl = Duration::from_secs(expires_in_s.max(0) as u64);
        let floor = ttl.saturating_sub(Duration::from_secs(300));
        let fraction = Duration::from_secs_f64(ttl.as_secs_f64() * 0.75);
        floor.min(fraction)
    }

    /// Returns a currently-valid access token, performing a single-flight
    /// refresh if the cached one is expired. Holding the lock across the
    /// network call is what makes concurrent callers share one refresh.
    pub async fn get_valid_access_token(&self, now_ms: i64) -> Result<String, TokenError> {
        let mut guard = self.tokens.lock().await;
        let tokens = guard.as_ref().ok_or(TokenError::NotAuthenticated)?;

        if tokens.expires_at > now_ms {
            return Ok(tokens.access_token.clone());
        }

        let refresh_token = tokens.refresh_token.clone();
        let response = self
            .http
            .post(format!("{}/api/auth/refresh", self.base_url))
            .json(&RefreshRequest { refresh_token: refresh_token.clone() })
            .send()
            .await?;

        if !response.status().is_success() {
            *guard = None;
            return Err(TokenError::SessionExpired);
        }

        let body: RefreshResponse = response.json().await?;
        let refreshed = Tokens {
            access_token: body.access_token.clone(),
            refresh_token,
            expires_at: now_ms + 900_000,
        };
        *guard = Some(refreshed);
        Ok(body.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proactive_refresh_uses_the_tighter_bound() {
        // ttl=900s: floor=600s, fraction=675s -> 600s wins
        assert_eq!(TokenManager::proactive_refresh_delay(900), Duration::from_secs(600));
        // ttl=120s: floor=0s (saturating), fraction=90s -> 0s wins
        assert_eq!(TokenManager::proactive_refresh_delay(120), Duration::from_secs(0));
    }

    #[tokio::test]
    async fn unauthenticated_session_errors() {
        let tm = TokenManager::new(reqwest::Client::new(), "https://sync.example.com");
        let err = tm.get_valid_access_token(0).await.unwrap_err();
        assert!(matches!(err, TokenError::NotAuthenticated));
    }

    #[tokio::test]
    async fn cached_token_returned_without_network_call() {
        let tm = TokenManager::new(reqwest::Client::new(), "https://sync.example.com");
        tm.store_auth_tokens("access-1".into(), "refresh-1".into(), 900, 0).await;
        let token = tm.get_valid_access_token(1_000).await.unwrap();
        assert_eq!(token, "access-1");
    }
}
