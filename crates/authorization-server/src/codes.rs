//! Authorization code issuance and single-use redemption.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::authorize::AuthorizationRequest;
use crate::error::{OAuthError, StoreError, StoreResult};
use crate::pkce::{self, CodeChallengeMethod};
use crate::scope::ScopeSet;
use crate::store;

/// An issued authorization code and everything it is bound to.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationCode {
    pub value: String,
    pub client_id: String,
    pub subject: String,
    pub scopes: ScopeSet,
    pub redirect_uri: String,
    pub redirect_uri_supplied: bool,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,
    pub nonce: Option<String>,
    pub auth_time: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
    /// Family id shared by every token minted from this code.
    pub grant_id: String,
}

impl AuthorizationCode {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        store::is_expired(self.expires_at, now)
    }
}

impl fmt::Debug for AuthorizationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationCode")
            .field("client_id", &self.client_id)
            .field("subject", &self.subject)
            .field("scopes", &self.scopes)
            .field("expires_at", &self.expires_at)
            .field("consumed", &self.consumed)
            .field("grant_id", &self.grant_id)
            .finish()
    }
}

/// Result of the atomic consume step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// First redemption. The code is now marked consumed.
    Fresh(AuthorizationCode),
    /// The code was already consumed.
    Replayed { grant_id: String, client_id: String },
    /// The code had expired. It is now marked consumed.
    Expired,
    NotFound,
}

/// Storage for authorization codes.
#[async_trait]
pub trait AuthorizationCodeStore: Send + Sync {
    async fn insert(&self, code: AuthorizationCode) -> StoreResult<()>;

    /// Check-and-set the consumed flag in one step.
    async fn consume(&self, value: &str, now: DateTime<Utc>) -> StoreResult<ConsumeOutcome>;

    /// Drop expired codes. Returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<usize>;
}

/// In-memory code store.
#[derive(Default)]
pub struct InMemoryCodeStore {
    codes: RwLock<HashMap<String, AuthorizationCode>>,
}

impl InMemoryCodeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.codes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.codes.read().await.is_empty()
    }
}

#[async_trait]
impl AuthorizationCodeStore for InMemoryCodeStore {
    async fn insert(&self, code: AuthorizationCode) -> StoreResult<()> {
        self.codes.write().await.insert(code.value.clone(), code);
        Ok(())
    }

    async fn consume(&self, value: &str, now: DateTime<Utc>) -> StoreResult<ConsumeOutcome> {
        let mut codes = self.codes.write().await;
        let Some(code) = codes.get_mut(value) else {
            return Ok(ConsumeOutcome::NotFound);
        };
        if code.consumed {
            return Ok(ConsumeOutcome::Replayed {
                grant_id: code.grant_id.clone(),
                client_id: code.client_id.clone(),
            });
        }

        code.consumed = true;
        if code.is_expired(now) {
            return Ok(ConsumeOutcome::Expired);
        }
        Ok(ConsumeOutcome::Fresh(code.clone()))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let mut codes = self.codes.write().await;
        let before = codes.len();
        // Consumed codes stay until expiry so replays are still recognised.
        codes.retain(|_, code| !code.is_expired(now));
        Ok(before - codes.len())
    }
}

impl fmt::Debug for InMemoryCodeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryCodeStore").finish()
    }
}

/// Why a code could not be redeemed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CodeRejection {
    /// Second redemption of the same code. Tokens of the grant, issued to
    /// `client_id`, must be revoked.
    #[error("authorization code was already used")]
    Replayed { grant_id: String, client_id: String },

    #[error("{0}")]
    Invalid(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CodeRejection> for OAuthError {
    fn from(rejection: CodeRejection) -> Self {
        match rejection {
            CodeRejection::Store(err) => err.into(),
            other => Self::invalid_grant(other.to_string()),
        }
    }
}

/// What a token request presents alongside the code.
#[derive(Debug, Clone, Copy)]
pub struct Redemption<'a> {
    pub code: &'a str,
    pub client_id: &'a str,
    pub redirect_uri: Option<&'a str>,
    pub code_verifier: Option<&'a str>,
}

/// Issues codes and redeems them exactly once.
#[derive(Clone)]
pub struct AuthorizationCodes {
    store: Arc<dyn AuthorizationCodeStore>,
    ttl: Duration,
    store_timeout: Duration,
}

impl AuthorizationCodes {
    #[must_use]
    pub fn new(
        store: Arc<dyn AuthorizationCodeStore>,
        ttl: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            ttl,
            store_timeout,
        }
    }

    /// Issue a code for an approved request.
    pub async fn issue(
        &self,
        request: &AuthorizationRequest,
        subject: &str,
        granted: ScopeSet,
    ) -> StoreResult<AuthorizationCode> {
        let now = Utc::now();
        let code = AuthorizationCode {
            value: store::generate_token(),
            client_id: request.client_id.clone(),
            subject: subject.to_owned(),
            scopes: granted,
            redirect_uri: request.redirect_uri.clone(),
            redirect_uri_supplied: request.redirect_uri_supplied,
            code_challenge: request.code_challenge.clone(),
            code_challenge_method: request.code_challenge_method,
            nonce: request.nonce.clone(),
            auth_time: now,
            issued_at: now,
            expires_at: store::expiry_from(now, self.ttl),
            consumed: false,
            grant_id: uuid::Uuid::new_v4().to_string(),
        };

        store::bounded(self.store_timeout, self.store.insert(code.clone())).await?;
        Ok(code)
    }

    /// Redeem a code.
    ///
    /// The code is consumed before any binding is checked, so a mismatched
    /// attempt burns it for good.
    pub async fn redeem(
        &self,
        presented: Redemption<'_>,
    ) -> Result<AuthorizationCode, CodeRejection> {
        let consumed = self.store.consume(presented.code, Utc::now());
        let outcome = store::bounded(self.store_timeout, consumed).await?;

        let code = match outcome {
            ConsumeOutcome::Fresh(code) => code,
            ConsumeOutcome::Replayed { grant_id, client_id } => {
                tracing::warn!(
                    client_id = %presented.client_id,
                    grant_id = %grant_id,
                    "Authorization code replayed"
                );
                return Err(CodeRejection::Replayed { grant_id, client_id });
            }
            ConsumeOutcome::Expired => {
                return Err(CodeRejection::Invalid("authorization code has expired"));
            }
            ConsumeOutcome::NotFound => {
                return Err(CodeRejection::Invalid("authorization code is invalid"));
            }
        };

        if code.client_id != presented.client_id {
            tracing::warn!(
                client_id = %presented.client_id,
                issued_to = %code.client_id,
                "Authorization code presented by another client"
            );
            return Err(CodeRejection::Invalid("authorization code was issued to another client"));
        }

        match presented.redirect_uri {
            Some(uri) if uri != code.redirect_uri => {
                return Err(CodeRejection::Invalid("redirect_uri does not match"));
            }
            None if code.redirect_uri_supplied => {
                return Err(CodeRejection::Invalid("redirect_uri is required"));
            }
            _ => {}
        }

        match (&code.code_challenge, presented.code_verifier) {
            (Some(challenge), Some(verifier)) => {
                let method = code.code_challenge_method.unwrap_or(CodeChallengeMethod::Plain);
                if !pkce::verify(method, verifier, challenge) {
                    tracing::warn!(client_id = %code.client_id, "PKCE verification failed");
                    return Err(CodeRejection::Invalid("PKCE verification failed"));
                }
            }
            (Some(_), None) => return Err(CodeRejection::Invalid("code_verifier is required")),
            (None, Some(_)) => {
                return Err(CodeRejection::Invalid("code_verifier without code_challenge"));
            }
            (None, None) => {}
        }

        Ok(code)
    }

    /// Sweep expired codes.
    pub async fn purge_expired(&self) -> StoreResult<usize> {
        store::bounded(self.store_timeout, self.store.purge_expired(Utc::now())).await
    }
}

impl fmt::Debug for AuthorizationCodes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationCodes").field("ttl", &self.ttl).finish()
    }
}
