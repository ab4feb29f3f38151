//! Registered client model and its validating builder.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ClientError;
use super::secret;
use crate::scope::ScopeSet;

/// Named protocol flows a client can be allowed to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    ClientCredentials,
    RefreshToken,
    /// Resource owner password credentials. Deprecated; opt-in only.
    Password,
    /// Implicit grant. Deprecated; opt-in only.
    Implicit,
}

impl GrantType {
    pub const ALL: [Self; 5] = [
        Self::AuthorizationCode,
        Self::ClientCredentials,
        Self::RefreshToken,
        Self::Password,
        Self::Implicit,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::ClientCredentials => "client_credentials",
            Self::RefreshToken => "refresh_token",
            Self::Password => "password",
            Self::Implicit => "implicit",
        }
    }

    /// Whether the grant is excluded from OAuth 2.1.
    #[must_use]
    pub const fn is_legacy(self) -> bool {
        matches!(self, Self::Password | Self::Implicit)
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(Self::AuthorizationCode),
            "client_credentials" => Ok(Self::ClientCredentials),
            "refresh_token" => Ok(Self::RefreshToken),
            "password" => Ok(Self::Password),
            "implicit" => Ok(Self::Implicit),
            other => Err(ClientError::InvalidMetadata(format!("unknown grant type: {other}"))),
        }
    }
}

/// How a client proves its identity at the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    /// Shared secret in an HTTP Basic `Authorization` header.
    ClientSecretBasic,
    /// Shared secret in the form body.
    ClientSecretPost,
    /// Public client, no secret.
    None,
}

impl ClientAuthMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientSecretBasic => "client_secret_basic",
            Self::ClientSecretPost => "client_secret_post",
            Self::None => "none",
        }
    }
}

impl fmt::Display for ClientAuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientAuthMethod {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client_secret_basic" => Ok(Self::ClientSecretBasic),
            "client_secret_post" => Ok(Self::ClientSecretPost),
            "none" => Ok(Self::None),
            other => Err(ClientError::InvalidMetadata(format!(
                "unknown token endpoint auth method: {other}"
            ))),
        }
    }
}

/// Per-client authorization behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientSettings {
    /// Demand PKCE even though the client is confidential.
    pub require_pkce: bool,
    /// Ask the end-user before granting scopes to this client.
    pub require_consent: bool,
}

/// Per-client token lifetimes. `None` falls back to the server defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenSettings {
    pub access_token_ttl: Option<Duration>,
    pub refresh_token_ttl: Option<Duration>,
    /// Keep the same refresh token value on refresh instead of rotating it.
    pub reuse_refresh_tokens: bool,
}

/// A client registration. Replaced wholesale on update, never mutated in place.
#[derive(Clone, PartialEq, Eq)]
pub struct RegisteredClient {
    pub id: Uuid,
    pub client_id: String,
    pub client_name: Option<String>,
    /// Argon2id PHC string. `None` for public clients.
    pub client_secret_hash: Option<String>,
    pub client_id_issued_at: DateTime<Utc>,
    pub client_secret_expires_at: Option<DateTime<Utc>>,
    pub authentication_methods: BTreeSet<ClientAuthMethod>,
    pub grant_types: BTreeSet<GrantType>,
    /// Compared byte-for-byte, never by prefix.
    pub redirect_uris: Vec<String>,
    pub scopes: ScopeSet,
    pub settings: ClientSettings,
    pub token_settings: TokenSettings,
}

impl RegisteredClient {
    pub fn builder(client_id: impl Into<String>) -> RegisteredClientBuilder {
        RegisteredClientBuilder::new(client_id.into())
    }

    /// A client without a secret cannot keep one confidential.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.client_secret_hash.is_none()
    }

    #[must_use]
    pub fn allows_grant(&self, grant: GrantType) -> bool {
        self.grant_types.contains(&grant)
    }

    #[must_use]
    pub fn allows_method(&self, method: ClientAuthMethod) -> bool {
        self.authentication_methods.contains(&method)
    }

    #[must_use]
    pub fn has_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|registered| registered == uri)
    }

    #[must_use]
    pub fn requires_pkce(&self) -> bool {
        self.is_public() || self.settings.require_pkce
    }

    #[must_use]
    pub fn secret_expired(&self, now: DateTime<Utc>) -> bool {
        self.client_secret_expires_at.is_some_and(|expires| now >= expires)
    }
}

impl fmt::Debug for RegisteredClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredClient")
            .field("client_id", &self.client_id)
            .field("client_name", &self.client_name)
            .field("public", &self.is_public())
            .field("grant_types", &self.grant_types)
            .field("redirect_uris", &self.redirect_uris)
            .field("scopes", &self.scopes)
            .finish()
    }
}

#[derive(Debug)]
enum SecretInput {
    Plain(String),
    Hashed(String),
}

/// Builder mirroring the fluent registration style of a client repository.
#[derive(Debug)]
pub struct RegisteredClientBuilder {
    id: Uuid,
    client_id: String,
    client_name: Option<String>,
    secret: Option<SecretInput>,
    client_id_issued_at: Option<DateTime<Utc>>,
    client_secret_expires_at: Option<DateTime<Utc>>,
    authentication_methods: BTreeSet<ClientAuthMethod>,
    grant_types: BTreeSet<GrantType>,
    redirect_uris: Vec<String>,
    scopes: ScopeSet,
    settings: ClientSettings,
    token_settings: TokenSettings,
}

impl RegisteredClientBuilder {
    fn new(client_id: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_id,
            client_name: None,
            secret: None,
            client_id_issued_at: None,
            client_secret_expires_at: None,
            authentication_methods: BTreeSet::new(),
            grant_types: BTreeSet::new(),
            redirect_uris: Vec::new(),
            scopes: ScopeSet::new(),
            settings: ClientSettings::default(),
            token_settings: TokenSettings::default(),
        }
    }

    #[must_use]
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// Plaintext secret, hashed with Argon2id by [`Self::build`].
    #[must_use]
    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(SecretInput::Plain(secret.into()));
        self
    }

    /// Already-hashed secret in PHC string format.
    #[must_use]
    pub fn client_secret_hash(mut self, hash: impl Into<String>) -> Self {
        self.secret = Some(SecretInput::Hashed(hash.into()));
        self
    }

    #[must_use]
    pub fn client_secret_expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.client_secret_expires_at = Some(at);
        self
    }

    #[must_use]
    pub fn client_id_issued_at(mut self, at: DateTime<Utc>) -> Self {
        self.client_id_issued_at = Some(at);
        self
    }

    #[must_use]
    pub fn authentication_method(mut self, method: ClientAuthMethod) -> Self {
        self.authentication_methods.insert(method);
        self
    }

    #[must_use]
    pub fn grant_type(mut self, grant: GrantType) -> Self {
        self.grant_types.insert(grant);
        self
    }

    #[must_use]
    pub fn redirect_uri(mut self, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        if !self.redirect_uris.contains(&uri) {
            self.redirect_uris.push(uri);
        }
        self
    }

    #[must_use]
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes = self.scopes.union(&ScopeSet::from_iter([scope.into()]));
        self
    }

    #[must_use]
    pub fn scopes(mut self, scopes: &ScopeSet) -> Self {
        self.scopes = self.scopes.union(scopes);
        self
    }

    #[must_use]
    pub fn require_pkce(mut self, required: bool) -> Self {
        self.settings.require_pkce = required;
        self
    }

    #[must_use]
    pub fn require_consent(mut self, required: bool) -> Self {
        self.settings.require_consent = required;
        self
    }

    #[must_use]
    pub fn token_settings(mut self, settings: TokenSettings) -> Self {
        self.token_settings = settings;
        self
    }

    /// Validate the metadata and produce the immutable registration.
    ///
    /// Hashing a plaintext secret is CPU-bound; call from a blocking context
    /// when building on the request path.
    pub fn build(self) -> Result<RegisteredClient, ClientError> {
        if self.client_id.is_empty() {
            return Err(ClientError::InvalidMetadata("client_id is empty".into()));
        }

        let client_secret_hash = match self.secret {
            Some(SecretInput::Plain(plain)) => Some(secret::hash_secret(&plain)?),
            Some(SecretInput::Hashed(hash)) => {
                secret::check_hash_format(&hash)?;
                Some(hash)
            }
            None => None,
        };

        let mut methods = self.authentication_methods;
        if methods.is_empty() {
            methods.insert(if client_secret_hash.is_some() {
                ClientAuthMethod::ClientSecretBasic
            } else {
                ClientAuthMethod::None
            });
        }
        let public = client_secret_hash.is_none();
        if public && methods.iter().any(|m| *m != ClientAuthMethod::None) {
            return Err(ClientError::InvalidMetadata(
                "secret-based authentication requires a client secret".into(),
            ));
        }
        if !public && methods.contains(&ClientAuthMethod::None) {
            return Err(ClientError::InvalidMetadata(
                "a confidential client cannot use auth method none".into(),
            ));
        }

        let mut grants = self.grant_types;
        if grants.is_empty() {
            grants.insert(GrantType::AuthorizationCode);
        }
        if public
            && (grants.contains(&GrantType::ClientCredentials)
                || grants.contains(&GrantType::Password))
        {
            return Err(ClientError::InvalidMetadata(
                "public clients cannot use client_credentials or password".into(),
            ));
        }

        let redirecting =
            grants.contains(&GrantType::AuthorizationCode) || grants.contains(&GrantType::Implicit);
        if redirecting && self.redirect_uris.is_empty() {
            return Err(ClientError::InvalidRedirectUri(
                "redirect_uris is required for redirect-based grants".into(),
            ));
        }
        for uri in &self.redirect_uris {
            validate_redirect_uri(uri)?;
        }

        Ok(RegisteredClient {
            id: self.id,
            client_id: self.client_id,
            client_name: self.client_name,
            client_secret_hash,
            client_id_issued_at: self.client_id_issued_at.unwrap_or_else(Utc::now),
            client_secret_expires_at: self.client_secret_expires_at,
            authentication_methods: methods,
            grant_types: grants,
            redirect_uris: self.redirect_uris,
            scopes: self.scopes,
            settings: self.settings,
            token_settings: self.token_settings,
        })
    }
}

/// Registered redirect URIs are absolute and carry no fragment (RFC 6749 §3.1.2).
fn validate_redirect_uri(uri: &str) -> Result<(), ClientError> {
    let parsed =
        url::Url::parse(uri).map_err(|e| ClientError::InvalidRedirectUri(format!("{uri}: {e}")))?;
    if parsed.fragment().is_some() {
        return Err(ClientError::InvalidRedirectUri(format!("must not contain a fragment: {uri}")));
    }
    Ok(())
}
