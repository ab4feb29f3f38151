//! Client registry: registered clients and client authentication.
//!
//! The registry is a trait from the start. [`InMemoryClientRepository`] backs
//! tests and small deployments; [`file::load_clients`] seeds it from a JSON
//! document.

pub mod file;
pub mod model;
pub mod secret;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{OAuthError, OAuthResult, StoreResult};

pub use model::{
    ClientAuthMethod, ClientSettings, GrantType, RegisteredClient, RegisteredClientBuilder,
    TokenSettings,
};

/// Errors raised while building or loading client registrations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The registration metadata is inconsistent.
    #[error("invalid client metadata: {0}")]
    InvalidMetadata(String),

    /// A redirect URI is missing, unparsable or carries a fragment.
    #[error("invalid redirect_uri: {0}")]
    InvalidRedirectUri(String),

    /// Secret hashing failed or a stored hash is malformed.
    #[error("client secret hashing failed: {0}")]
    Hash(String),
}

/// Credentials a client presented at a token-style endpoint.
#[derive(Clone, PartialEq, Eq)]
pub enum ClientCredentials {
    /// HTTP Basic `Authorization` header.
    Basic { client_id: String, client_secret: String },
    /// `client_id` and `client_secret` form parameters.
    Post { client_id: String, client_secret: String },
    /// Public client identifying itself with `client_id` only.
    Public { client_id: String },
}

impl ClientCredentials {
    #[must_use]
    pub fn client_id(&self) -> &str {
        match self {
            Self::Basic { client_id, .. }
            | Self::Post { client_id, .. }
            | Self::Public { client_id } => client_id,
        }
    }

    #[must_use]
    pub const fn method(&self) -> ClientAuthMethod {
        match self {
            Self::Basic { .. } => ClientAuthMethod::ClientSecretBasic,
            Self::Post { .. } => ClientAuthMethod::ClientSecretPost,
            Self::Public { .. } => ClientAuthMethod::None,
        }
    }

    fn secret(&self) -> Option<&str> {
        match self {
            Self::Basic { client_secret, .. } | Self::Post { client_secret, .. } => {
                Some(client_secret)
            }
            Self::Public { .. } => None,
        }
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id())
            .field("method", &self.method())
            .finish()
    }
}

/// Lookup and authentication of registered clients.
#[async_trait]
pub trait ClientRepository: Send + Sync {
    /// Find a client by its public identifier.
    async fn lookup(&self, client_id: &str) -> StoreResult<Option<RegisteredClient>>;

    /// Insert or wholesale-replace a registration.
    async fn save(&self, client: RegisteredClient) -> StoreResult<()>;

    /// Authenticate presented credentials.
    ///
    /// Fails with `invalid_client` when the client is unknown, the method is
    /// not registered for it, the secret does not match or has expired.
    async fn authenticate(&self, credentials: &ClientCredentials) -> OAuthResult<RegisteredClient> {
        let client_id = credentials.client_id();
        let Some(client) = self.lookup(client_id).await? else {
            tracing::warn!(client_id = %client_id, "Authentication for unknown client");
            return Err(OAuthError::invalid_client());
        };

        let method = credentials.method();
        if !client.allows_method(method) {
            tracing::warn!(
                client_id = %client_id,
                method = %method,
                "Authentication method not registered"
            );
            return Err(OAuthError::invalid_client());
        }

        let Some(presented) = credentials.secret() else {
            // Public client: the method check above is the whole proof.
            return Ok(client);
        };
        let Some(stored) = client.client_secret_hash.clone() else {
            return Err(OAuthError::invalid_client());
        };

        let presented = presented.to_owned();
        let verified =
            tokio::task::spawn_blocking(move || secret::verify_secret(&presented, &stored));
        let matches = verified.await.unwrap_or(false);
        if !matches {
            tracing::warn!(client_id = %client_id, "Client secret validation failed");
            return Err(OAuthError::invalid_client());
        }

        if client.secret_expired(Utc::now()) {
            tracing::warn!(client_id = %client_id, "Client secret has expired");
            return Err(OAuthError::invalid_client());
        }

        tracing::debug!(client_id = %client_id, method = %method, "Client authenticated");
        Ok(client)
    }
}

/// In-memory client registry.
#[derive(Default)]
pub struct InMemoryClientRepository {
    clients: RwLock<HashMap<String, RegisteredClient>>,
}

impl InMemoryClientRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the registry with pre-built registrations.
    #[must_use]
    pub fn with_clients(clients: impl IntoIterator<Item = RegisteredClient>) -> Self {
        let map = clients.into_iter().map(|c| (c.client_id.clone(), c)).collect();
        Self { clients: RwLock::new(map) }
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

#[async_trait]
impl ClientRepository for InMemoryClientRepository {
    async fn lookup(&self, client_id: &str) -> StoreResult<Option<RegisteredClient>> {
        Ok(self.clients.read().await.get(client_id).cloned())
    }

    async fn save(&self, client: RegisteredClient) -> StoreResult<()> {
        self.clients.write().await.insert(client.client_id.clone(), client);
        Ok(())
    }
}

impl fmt::Debug for InMemoryClientRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryClientRepository").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confidential() -> RegisteredClient {
        RegisteredClient::builder("messaging-client")
            .client_secret("secret")
            .authentication_method(ClientAuthMethod::ClientSecretBasic)
            .grant_type(GrantType::ClientCredentials)
            .scope("message.read")
            .build()
            .unwrap()
    }

    fn basic(secret: &str) -> ClientCredentials {
        ClientCredentials::Basic {
            client_id: "messaging-client".into(),
            client_secret: secret.into(),
        }
    }

    #[tokio::test]
    async fn test_authenticate_basic() {
        let repo = InMemoryClientRepository::with_clients([confidential()]);
        let client = repo.authenticate(&basic("secret")).await.unwrap();
        assert_eq!(client.client_id, "messaging-client");
    }

    #[tokio::test]
    async fn test_wrong_secret() {
        let repo = InMemoryClientRepository::with_clients([confidential()]);
        assert_eq!(repo.authenticate(&basic("nope")).await.unwrap_err().code(), "invalid_client");
    }

    #[tokio::test]
    async fn test_unregistered_method() {
        let repo = InMemoryClientRepository::with_clients([confidential()]);
        let post = ClientCredentials::Post {
            client_id: "messaging-client".into(),
            client_secret: "secret".into(),
        };
        assert!(repo.authenticate(&post).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_client() {
        let repo = InMemoryClientRepository::new();
        assert!(repo.authenticate(&basic("secret")).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_secret() {
        let client = RegisteredClient::builder("messaging-client")
            .client_secret("secret")
            .grant_type(GrantType::ClientCredentials)
            .client_secret_expires_at(Utc::now() - chrono::TimeDelta::seconds(5))
            .build()
            .unwrap();
        let repo = InMemoryClientRepository::with_clients([client]);
        assert!(repo.authenticate(&basic("secret")).await.is_err());
    }

    #[tokio::test]
    async fn test_public_client_cannot_claim_secret_method() {
        let spa = RegisteredClient::builder("spa")
            .redirect_uri("https://app.example/cb")
            .build()
            .unwrap();
        let repo = InMemoryClientRepository::with_clients([spa]);

        let public = ClientCredentials::Public { client_id: "spa".into() };
        assert!(repo.authenticate(&public).await.is_ok());

        let post = ClientCredentials::Post { client_id: "spa".into(), client_secret: "x".into() };
        assert!(repo.authenticate(&post).await.is_err());
    }

    #[tokio::test]
    async fn test_save_replaces_wholesale() {
        let repo = InMemoryClientRepository::with_clients([confidential()]);
        let replacement = RegisteredClient::builder("messaging-client")
            .client_secret("rotated")
            .grant_type(GrantType::ClientCredentials)
            .build()
            .unwrap();
        repo.save(replacement).await.unwrap();

        assert!(repo.authenticate(&basic("secret")).await.is_err());
        assert!(repo.authenticate(&basic("rotated")).await.is_ok());
        let stored = repo.lookup("messaging-client").await.unwrap().unwrap();
        assert!(stored.scopes.is_empty());
    }
}
