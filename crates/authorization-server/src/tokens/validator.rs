//! Token validation, introspection (RFC 7662) and revocation (RFC 7009).

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::Validation;
use jsonwebtoken::errors::ErrorKind;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::claims::{AccessTokenClaims, IdTokenClaims};
use super::refresh::RefreshTokenStore;
use super::{family_retention, seconds};
use crate::clients::RegisteredClient;
use crate::config::Config;
use crate::error::{OAuthError, OAuthResult};
use crate::keys::{ALGORITHM, KeyManager};
use crate::store;

/// Why a presented JWT was refused.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    #[error("token is malformed")]
    Malformed,

    #[error("token was signed by an unknown key")]
    UnknownKey,

    #[error("token signature is invalid")]
    BadSignature,

    #[error("token was issued by another issuer")]
    WrongIssuer,

    #[error("token has expired")]
    Expired,

    #[error("token is not yet valid")]
    NotYetValid,

    #[error("token is not intended for this audience")]
    WrongAudience,

    #[error("token has been revoked")]
    Revoked,
}

impl From<TokenRejection> for OAuthError {
    fn from(rejection: TokenRejection) -> Self {
        Self::invalid_token(rejection.to_string())
    }
}

/// RFC 7662 introspection response. Inactive tokens carry `active` only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl IntrospectionResponse {
    #[must_use]
    pub fn inactive() -> Self {
        Self::default()
    }
}

/// Verifies tokens against the current key set and revocation state.
pub struct TokenValidator {
    config: Arc<Config>,
    keys: Arc<KeyManager>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
}

impl TokenValidator {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        keys: Arc<KeyManager>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
    ) -> Self {
        Self {
            config,
            keys,
            refresh_tokens,
        }
    }

    /// Stateless validation of an access token for `audience`.
    ///
    /// Order: key id, signature, issuer, `exp`, `nbf`, audience.
    pub fn validate_access_token(
        &self,
        token: &str,
        audience: &str,
    ) -> Result<AccessTokenClaims, TokenRejection> {
        let claims = self.check_access_token(token)?;
        if claims.aud != audience {
            return Err(TokenRejection::WrongAudience);
        }
        Ok(claims)
    }

    /// Validate an ID token issued to `client_id`.
    pub fn validate_id_token(
        &self,
        token: &str,
        client_id: &str,
    ) -> Result<IdTokenClaims, TokenRejection> {
        let claims: IdTokenClaims = self.decode(token)?;
        if claims.iss != self.config.issuer {
            return Err(TokenRejection::WrongIssuer);
        }
        self.check_times(claims.exp, None)?;
        if claims.aud != client_id {
            return Err(TokenRejection::WrongAudience);
        }
        Ok(claims)
    }

    /// Validate a bearer token for this server's own resources, including
    /// revocation of its grant family.
    pub async fn authenticate_bearer(&self, token: &str) -> OAuthResult<AccessTokenClaims> {
        let claims = self.validate_access_token(token, &self.config.audience)?;
        if self.family_revoked(&claims.gid).await? {
            return Err(TokenRejection::Revoked.into());
        }
        Ok(claims)
    }

    /// RFC 7662 introspection on behalf of an authenticated client.
    ///
    /// Refresh tokens are only described to the client they were issued to.
    pub async fn introspect(
        &self,
        token: &str,
        client: &RegisteredClient,
    ) -> OAuthResult<IntrospectionResponse> {
        if looks_like_jwt(token) {
            let Ok(claims) = self.check_access_token(token) else {
                return Ok(IntrospectionResponse::inactive());
            };
            if self.family_revoked(&claims.gid).await? {
                return Ok(IntrospectionResponse::inactive());
            }
            return Ok(IntrospectionResponse {
                active: true,
                scope: Some(claims.scope.to_string()),
                client_id: Some(claims.client_id),
                token_type: Some("Bearer"),
                exp: Some(claims.exp),
                iat: Some(claims.iat),
                nbf: Some(claims.nbf),
                sub: Some(claims.sub),
                aud: Some(claims.aud),
                iss: Some(claims.iss),
                jti: Some(claims.jti),
            });
        }

        let timeout = self.config.store_timeout;
        let found = store::bounded(timeout, self.refresh_tokens.find(&store::digest(token))).await?;
        let Some(record) = found else {
            return Ok(IntrospectionResponse::inactive());
        };
        if record.client_id != client.client_id
            || record.revoked
            || record.is_expired(Utc::now())
            || self.family_revoked(&record.grant_id).await?
        {
            return Ok(IntrospectionResponse::inactive());
        }

        Ok(IntrospectionResponse {
            active: true,
            scope: Some(record.scopes.to_string()),
            client_id: Some(record.client_id),
            token_type: Some("refresh_token"),
            exp: Some(record.expires_at.timestamp()),
            iat: Some(record.issued_at.timestamp()),
            sub: Some(record.subject),
            iss: Some(self.config.issuer.clone()),
            ..IntrospectionResponse::default()
        })
    }

    /// RFC 7009 revocation. Revokes the whole grant family the token belongs
    /// to. Unknown tokens and tokens of other clients are ignored.
    pub async fn revoke(&self, token: &str, client: &RegisteredClient) -> OAuthResult<()> {
        let grant_id = if looks_like_jwt(token) {
            // Expired access tokens may still be revoked.
            match self.decode::<AccessTokenClaims>(token) {
                Ok(claims)
                    if claims.iss == self.config.issuer && claims.client_id == client.client_id =>
                {
                    Some(claims.gid)
                }
                _ => None,
            }
        } else {
            let found = store::bounded(
                self.config.store_timeout,
                self.refresh_tokens.find(&store::digest(token)),
            )
            .await?;
            found.filter(|r| r.client_id == client.client_id).map(|r| r.grant_id)
        };

        let Some(grant_id) = grant_id else {
            tracing::debug!(
                client_id = %client.client_id,
                "Revocation of unknown or foreign token ignored"
            );
            return Ok(());
        };
        let retention = family_retention(&self.config, client.token_settings);
        let until = store::expiry_from(Utc::now(), retention);
        store::bounded(
            self.config.store_timeout,
            self.refresh_tokens.revoke_family(&grant_id, until),
        )
        .await?;
        tracing::info!(client_id = %client.client_id, grant_id = %grant_id, "Token revoked");
        Ok(())
    }

    // ─── Internals ──────────────────────────────────────────────────────────

    /// Everything but the audience.
    fn check_access_token(&self, token: &str) -> Result<AccessTokenClaims, TokenRejection> {
        let claims: AccessTokenClaims = self.decode(token)?;
        if claims.iss != self.config.issuer {
            return Err(TokenRejection::WrongIssuer);
        }
        self.check_times(claims.exp, Some(claims.nbf))?;
        Ok(claims)
    }

    /// Resolve the key by `kid` and verify the RS256 signature. Time and
    /// audience claims are checked by the caller.
    fn decode<T: DeserializeOwned>(&self, token: &str) -> Result<T, TokenRejection> {
        let header = jsonwebtoken::decode_header(token).map_err(|_| TokenRejection::Malformed)?;
        if header.alg != ALGORITHM {
            return Err(TokenRejection::BadSignature);
        }
        let kid = header.kid.ok_or(TokenRejection::UnknownKey)?;

        let snapshot = self.keys.snapshot();
        let key = snapshot.get(&kid).ok_or(TokenRejection::UnknownKey)?;

        let mut validation = Validation::new(ALGORITHM);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        jsonwebtoken::decode::<T>(token, key.decoding_key(), &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => TokenRejection::BadSignature,
                _ => TokenRejection::Malformed,
            })
    }

    fn check_times(&self, exp: i64, nbf: Option<i64>) -> Result<(), TokenRejection> {
        let now = Utc::now().timestamp();
        let leeway = seconds(self.config.leeway);
        if now >= exp.saturating_add(leeway) {
            return Err(TokenRejection::Expired);
        }
        if nbf.is_some_and(|nbf| now.saturating_add(leeway) < nbf) {
            return Err(TokenRejection::NotYetValid);
        }
        Ok(())
    }

    async fn family_revoked(&self, grant_id: &str) -> OAuthResult<bool> {
        Ok(store::bounded(
            self.config.store_timeout,
            self.refresh_tokens.is_family_revoked(grant_id),
        )
        .await?)
    }
}

impl fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenValidator").field("issuer", &self.config.issuer).finish()
    }
}

fn looks_like_jwt(token: &str) -> bool {
    token.bytes().filter(|b| *b == b'.').count() == 2
}
