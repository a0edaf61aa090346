//! Server-side error taxonomy.
//!
//! Mirrors `journal_core::error::ErrorKind`'s categories but as a concrete
//! `thiserror` enum that knows how to render itself as the wire-level
//! `{error, code}` body described by the auth error contract, with the
//! matching HTTP status per category.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use journal_core::wire::ErrorResponse;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("email is not a valid address")]
    InvalidEmail,
    #[error("an account with this email already exists")]
    EmailExists,
    #[error("password does not meet strength requirements")]
    WeakPassword,
    #[error("invalid email or password")]
    InvalidCredentials,
    /// Unknown email at login. Same status and message as `InvalidCredentials`,
    /// only `code` differs, so the response shape never betrays account
    /// existence; `UserNotFound` below is for contexts (`/me`, refresh) where
    /// that distinction isn't a secret.
    #[error("invalid email or password")]
    LoginUserNotFound,
    #[error("refresh token is invalid or expired")]
    InvalidRefreshToken,
    #[error("access token is invalid or expired")]
    InvalidAccessToken,
    #[error("no such user")]
    UserNotFound,
    #[error("the requested document is owned by another account")]
    AccessDenied,
    #[error("no such document")]
    DocumentNotFound,
    #[error("no such asset")]
    AssetNotFound,
    #[error("malformed document identifier")]
    ProtocolViolation,
    #[error("too many connections; retry later")]
    RateLimited,
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("password hashing error: {0}")]
    Hash(String),
    #[error("multipart error: {0}")]
    Multipart(String),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidEmail => "INVALID_EMAIL",
            ApiError::EmailExists => "EMAIL_EXISTS",
            ApiError::WeakPassword => "WEAK_PASSWORD",
            ApiError::InvalidCredentials => "INVALID_CREDENTIALS",
            ApiError::LoginUserNotFound => "USER_NOT_FOUND",
            ApiError::InvalidRefreshToken => "INVALID_REFRESH_TOKEN",
            ApiError::InvalidAccessToken => "INVALID_ACCESS_TOKEN",
            ApiError::UserNotFound => "USER_NOT_FOUND",
            ApiError::AccessDenied => "ACCESS_DENIED",
            ApiError::DocumentNotFound => "DOCUMENT_NOT_FOUND",
            ApiError::AssetNotFound => "ASSET_NOT_FOUND",
            ApiError::ProtocolViolation => "PROTOCOL_VIOLATION",
            ApiError::RateLimited => "RATE_LIMITED",
            ApiError::Db(_) => "INTERNAL",
            ApiError::Hash(_) => "INTERNAL",
            ApiError::Multipart(_) => "BAD_REQUEST",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidEmail | ApiError::WeakPassword | ApiError::ProtocolViolation | ApiError::Multipart(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::EmailExists => StatusCode::CONFLICT,
            ApiError::InvalidCredentials
            | ApiError::LoginUserNotFound
            | ApiError::InvalidRefreshToken
            | ApiError::InvalidAccessToken => StatusCode::UNAUTHORIZED,
            ApiError::AccessDenied => StatusCode::FORBIDDEN,
            ApiError::UserNotFound | ApiError::DocumentNotFound | ApiError::AssetNotFound => {
                StatusCode::NOT_FOUND
            }
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Db(_) | ApiError::Hash(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, ApiError::Db(_) | ApiError::Hash(_)) {
            tracing::error!(error = %self, "internal error");
        }
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
