//! AuthService: registration, login, token refresh/logout, and the JWT
//! verification `WSGateway` and the REST extractors rely on.
//!
//! Grounded on the teacher's preference for a single service struct wrapping
//! the pool plus whatever secrets it needs (see `KeyService::new` taking a
//! namespace), generalised here to hold the JWT signing secret and token
//! TTLs so the rest of the server never touches `jsonwebtoken` directly.

use std::sync::OnceLock;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use journal_core::wire::{AuthResponse, RefreshResponse, UekRecordDto, UekRegistration, UserDto};

use crate::error::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

pub struct AuthService {
    pool: SqlitePool,
    jwt_secret: String,
    access_ttl_s: i64,
    refresh_ttl_days: i64,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    let at = email.find('@').ok_or(ApiError::InvalidEmail)?;
    if at == 0 || !email[at + 1..].contains('.') {
        return Err(ApiError::InvalidEmail);
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.len() < 8 {
        return Err(ApiError::WeakPassword);
    }
    Ok(())
}

fn generate_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A PHC hash `login` verifies against when the email doesn't exist, so a
/// lookup miss still pays the full Argon2id cost and can't be timed apart
/// from a wrong-password hit. Computed once per process; the password it was
/// hashed from is never used for anything else.
fn dummy_password_hash() -> &'static str {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(b"journal-core-login-timing-floor", &salt)
            .expect("hashing a fixed dummy password cannot fail")
            .to_string()
    })
}

impl AuthService {
    pub fn new(pool: SqlitePool, jwt_secret: String, access_ttl_s: i64, refresh_ttl_days: i64) -> Self {
        Self {
            pool,
            jwt_secret,
            access_ttl_s,
            refresh_ttl_days,
        }
    }

    fn issue_access_token(&self, user_id: Uuid, email: &str) -> String {
        let iat = now_ms() / 1000;
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            iat,
            exp: iat + self.access_ttl_s,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(self.jwt_secret.as_bytes()))
            .expect("encoding a well-formed JWT cannot fail")
    }

    async fn issue_refresh_token(&self, user_id: Uuid) -> Result<String, ApiError> {
        let token = generate_refresh_token();
        let now = now_ms();
        let expires_at = now + self.refresh_ttl_days * 86_400_000;
        sqlx::query("INSERT INTO refresh_tokens (token, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)")
            .bind(&token)
            .bind(user_id.to_string())
            .bind(expires_at)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(token)
    }

    async fn uek_record(&self, user_id: Uuid) -> Result<Option<UekRecordDto>, ApiError> {
        let row = sqlx::query_as::<_, (String, String, String, String, i64)>(
            "SELECT wrapped_uek, salt, nonce, auth_tag, version FROM user_uek WHERE user_id = ?",
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(wrapped_uek, salt, nonce, auth_tag, version)| UekRecordDto {
            wrapped_uek,
            salt,
            nonce,
            auth_tag,
            version: version as u32,
        }))
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        uek: Option<UekRegistration>,
    ) -> Result<AuthResponse, ApiError> {
        validate_email(email)?;
        validate_password(password)?;

        let existing = sqlx::query_as::<_, (String,)>("SELECT id FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_some() {
            return Err(ApiError::EmailExists);
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| ApiError::Hash(e.to_string()))?
            .to_string();

        let user_id = Uuid::new_v4();
        let now = now_ms();
        sqlx::query("INSERT INTO users (id, email, password_hash, created_at) VALUES (?, ?, ?, ?)")
            .bind(user_id.to_string())
            .bind(email)
            .bind(&password_hash)
            .bind(now)
            .execute(&self.pool)
            .await?;

        let uek_dto = if let Some(uek) = uek {
            sqlx::query(
                "INSERT INTO user_uek (user_id, wrapped_uek, salt, nonce, auth_tag, version) VALUES (?, ?, ?, ?, ?, 1)",
            )
            .bind(user_id.to_string())
            .bind(&uek.wrapped_uek)
            .bind(&uek.salt)
            .bind(&uek.nonce)
            .bind(&uek.auth_tag)
            .execute(&self.pool)
            .await?;
            Some(UekRecordDto {
                wrapped_uek: uek.wrapped_uek,
                salt: uek.salt,
                nonce: uek.nonce,
                auth_tag: uek.auth_tag,
                version: 1,
            })
        } else {
            None
        };

        let access_token = self.issue_access_token(user_id, email);
        let refresh_token = self.issue_refresh_token(user_id).await?;
        tracing::info!(%user_id, "registered new account");

        Ok(AuthResponse {
            user: UserDto { id: user_id, email: email.to_string() },
            access_token,
            refresh_token,
            uek: uek_dto,
        })
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let row = sqlx::query_as::<_, (String, String)>("SELECT id, password_hash FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        // Always run Argon2id verification, against a cached dummy hash when
        // the row is missing, so an unknown email takes the same time as a
        // wrong password and can't be distinguished by latency.
        let password_hash = match &row {
            Some((_, hash)) => hash.as_str(),
            None => dummy_password_hash(),
        };
        let parsed = PasswordHash::new(password_hash).map_err(|e| ApiError::Hash(e.to_string()))?;
        let password_matches = Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok();

        let Some((user_id_str, _)) = row else {
            return Err(ApiError::LoginUserNotFound);
        };
        if !password_matches {
            return Err(ApiError::InvalidCredentials);
        }
        let user_id = Uuid::parse_str(&user_id_str).map_err(|_| ApiError::InvalidCredentials)?;

        let uek_dto = self.uek_record(user_id).await?;
        let access_token = self.issue_access_token(user_id, email);
        let refresh_token = self.issue_refresh_token(user_id).await?;

        Ok(AuthResponse {
            user: UserDto { id: user_id, email: email.to_string() },
            access_token,
            refresh_token,
            uek: uek_dto,
        })
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        let row = sqlx::query_as::<_, (String, i64)>(
            "SELECT user_id, expires_at FROM refresh_tokens WHERE token = ?",
        )
        .bind(refresh_token)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ApiError::InvalidRefreshToken)?;
        let (user_id_str, expires_at) = row;
        if expires_at < now_ms() {
            return Err(ApiError::InvalidRefreshToken);
        }
        let user_id = Uuid::parse_str(&user_id_str).map_err(|_| ApiError::InvalidRefreshToken)?;
        let email: (String,) = sqlx::query_as("SELECT email FROM users WHERE id = ?")
            .bind(&user_id_str)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(ApiError::UserNotFound)?;

        Ok(RefreshResponse {
            access_token: self.issue_access_token(user_id, &email.0),
        })
    }

    /// Best-effort: a refresh token that is already gone is not an error from
    /// the caller's perspective, per the REST contract's 204-regardless.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), ApiError> {
        sqlx::query("DELETE FROM refresh_tokens WHERE token = ?")
            .bind(refresh_token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn me(&self, user_id: Uuid) -> Result<UserDto, ApiError> {
        let row: (String,) = sqlx::query_as("SELECT email FROM users WHERE id = ?")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(ApiError::UserNotFound)?;
        Ok(UserDto { id: user_id, email: row.0 })
    }

    /// Verifies a bearer access token, returning the authenticated user id.
    /// Used by both the REST bearer extractor and the WebSocket upgrade.
    pub fn verify_access_token(&self, token: &str) -> Result<Uuid, ApiError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| ApiError::InvalidAccessToken)?;
        Uuid::parse_str(&data.claims.sub).map_err(|_| ApiError::InvalidAccessToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service() -> AuthService {
        let pool = crate::db::connect("sqlite::memory:").await.unwrap();
        AuthService::new(pool, "test-secret".into(), 900, 90)
    }

    #[tokio::test]
    async fn register_then_login_round_trip() {
        let auth = service().await;
        let reg = auth.register("alice@example.com", "hunter2hunter", None).await.unwrap();
        assert_eq!(reg.user.email, "alice@example.com");

        let login = auth.login("alice@example.com", "hunter2hunter").await.unwrap();
        assert_eq!(login.user.id, reg.user.id);
        assert!(login.uek.is_none());
    }

    #[tokio::test]
    async fn unknown_email_rejected_with_distinct_code() {
        let auth = service().await;
        let err = auth.login("nobody@example.com", "whatever123").await.unwrap_err();
        assert!(matches!(err, ApiError::LoginUserNotFound));
    }

    #[tokio::test]
    async fn wrong_password_rejected() {
        let auth = service().await;
        auth.register("bob@example.com", "correcthorse", None).await.unwrap();
        let err = auth.login("bob@example.com", "wrong-password").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidCredentials));
    }

    #[tokio::test]
    async fn duplicate_email_rejected() {
        let auth = service().await;
        auth.register("carol@example.com", "hunter2hunter", None).await.unwrap();
        let err = auth.register("carol@example.com", "hunter2hunter", None).await.unwrap_err();
        assert!(matches!(err, ApiError::EmailExists));
    }

    #[tokio::test]
    async fn refresh_token_round_trip() {
        let auth = service().await;
        let reg = auth.register("dana@example.com", "hunter2hunter", None).await.unwrap();
        let refreshed = auth.refresh(&reg.refresh_token).await.unwrap();
        assert!(!refreshed.access_token.is_empty());

        auth.logout(&reg.refresh_token).await.unwrap();
        let err = auth.refresh(&reg.refresh_token).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidRefreshToken));
    }

    #[tokio::test]
    async fn access_token_round_trips_through_verification() {
        let auth = service().await;
        let reg = auth.register("erin@example.com", "hunter2hunter", None).await.unwrap();
        let user_id = auth.verify_access_token(&reg.access_token).unwrap();
        assert_eq!(user_id, reg.user.id);
    }
}
