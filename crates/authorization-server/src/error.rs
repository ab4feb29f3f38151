//! Error types for the authorization server.
//!
//! Uses `thiserror` for structured error handling with automatic `From` implementations.
//! Only [`OAuthError`] crosses the trust boundary: its code and description are
//! what a client sees. Store and key failures are logged and collapsed into
//! `server_error`.

use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Protocol errors, named after their RFC 6749 / OIDC error codes.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OAuthError {
    /// Malformed request: missing, repeated or unparseable parameters.
    #[error("invalid_request: {0}")]
    InvalidRequest(String),

    /// Client authentication failed.
    #[error("invalid_client: {0}")]
    InvalidClient(String),

    /// Bad, expired, replayed or mismatched code or refresh token.
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),

    /// The client may not use the requested grant or response type.
    #[error("unauthorized_client: {0}")]
    UnauthorizedClient(String),

    /// The grant type is unknown or disabled on this server.
    #[error("unsupported_grant_type: {0}")]
    UnsupportedGrantType(String),

    /// Requested scope is malformed or exceeds what is allowed.
    #[error("invalid_scope: {0}")]
    InvalidScope(String),

    /// The response type is unknown or disabled on this server.
    #[error("unsupported_response_type: {0}")]
    UnsupportedResponseType(String),

    /// The resource owner denied the request.
    #[error("access_denied: {0}")]
    AccessDenied(String),

    /// No authenticated end-user accompanies the authorization request.
    #[error("login_required: {0}")]
    LoginRequired(String),

    /// Consent is needed but `prompt=none` forbids asking for it.
    #[error("consent_required: {0}")]
    ConsentRequired(String),

    /// A presented bearer token is not acceptable.
    #[error("invalid_token: {0}")]
    InvalidToken(String),

    /// Internal failure. The description is always generic.
    #[error("server_error")]
    ServerError,
}

impl OAuthError {
    #[must_use]
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::InvalidRequest(description.into())
    }

    #[must_use]
    pub fn invalid_client() -> Self {
        Self::InvalidClient("client authentication failed".to_owned())
    }

    #[must_use]
    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::InvalidGrant(description.into())
    }

    #[must_use]
    pub fn unauthorized_client(description: impl Into<String>) -> Self {
        Self::UnauthorizedClient(description.into())
    }

    #[must_use]
    pub fn unsupported_grant_type(description: impl Into<String>) -> Self {
        Self::UnsupportedGrantType(description.into())
    }

    #[must_use]
    pub fn invalid_scope(description: impl Into<String>) -> Self {
        Self::InvalidScope(description.into())
    }

    #[must_use]
    pub fn invalid_token(description: impl Into<String>) -> Self {
        Self::InvalidToken(description.into())
    }

    /// The wire error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::UnauthorizedClient(_) => "unauthorized_client",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::InvalidScope(_) => "invalid_scope",
            Self::UnsupportedResponseType(_) => "unsupported_response_type",
            Self::AccessDenied(_) => "access_denied",
            Self::LoginRequired(_) => "login_required",
            Self::ConsentRequired(_) => "consent_required",
            Self::InvalidToken(_) => "invalid_token",
            Self::ServerError => "server_error",
        }
    }

    /// The human-readable description that is safe to show a client.
    #[must_use]
    pub fn description(&self) -> &str {
        match self {
            Self::InvalidRequest(d)
            | Self::InvalidClient(d)
            | Self::InvalidGrant(d)
            | Self::UnauthorizedClient(d)
            | Self::UnsupportedGrantType(d)
            | Self::InvalidScope(d)
            | Self::UnsupportedResponseType(d)
            | Self::AccessDenied(d)
            | Self::LoginRequired(d)
            | Self::ConsentRequired(d)
            | Self::InvalidToken(d) => d,
            Self::ServerError => "the server encountered an internal error",
        }
    }

    /// HTTP status used when the error is returned directly (not by redirect).
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidClient(_) | Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// The JSON body for a direct error response.
    #[must_use]
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.code(),
            error_description: self.description().to_owned(),
        }
    }
}

/// `{error, error_description}` as returned by the token-style endpoints.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: &'static str,
    pub error_description: String,
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(self.body())).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        response
    }
}

/// Errors from a credential or client store backend.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend did not answer within the configured bound.
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The backend refused or failed the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for OAuthError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "Credential store failure");
        Self::ServerError
    }
}

/// Errors from signing key handling.
#[derive(thiserror::Error, Debug)]
pub enum KeyError {
    /// RSA key generation failed.
    #[error("key generation failed: {0}")]
    Generation(String),

    /// A key could not be encoded or parsed.
    #[error("key encoding failed: {0}")]
    Encoding(String),

    /// No key is marked active for signing.
    #[error("no active signing key")]
    NoActiveKey,

    /// The requested key id is not in the key set.
    #[error("unknown key id: {0}")]
    UnknownKey(String),

    /// The active key cannot be removed, only retired by rotation.
    #[error("key {0} is the active signer")]
    ActiveKey(String),

    /// JWT encoding failed.
    #[error("signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

impl From<KeyError> for OAuthError {
    fn from(err: KeyError) -> Self {
        tracing::error!(error = %err, "Signing key failure");
        Self::ServerError
    }
}

/// Result type alias for protocol operations.
pub type OAuthResult<T> = Result<T, OAuthError>;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(OAuthError::invalid_client().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(OAuthError::invalid_grant("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(OAuthError::ServerError.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_store_error_does_not_leak() {
        let err: OAuthError = StoreError::Unavailable("db at 10.0.0.3 refused".into()).into();
        assert_eq!(err, OAuthError::ServerError);
        assert!(!err.description().contains("10.0.0.3"));
    }

    #[test]
    fn test_body_uses_wire_code() {
        let body = OAuthError::unsupported_grant_type("password").body();
        assert_eq!(body.error, "unsupported_grant_type");
        assert_eq!(body.error_description, "password");
    }
}
