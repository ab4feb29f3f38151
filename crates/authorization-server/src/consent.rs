//! Consent tracking: which scopes an end-user has granted to which client.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::clients::RegisteredClient;
use crate::error::StoreResult;
use crate::scope::{OPENID, ScopeSet};

/// Persisted consent decisions keyed by `(client_id, subject)`.
#[async_trait]
pub trait ConsentStore: Send + Sync {
    /// Scopes previously granted, empty if none.
    async fn granted(&self, client_id: &str, subject: &str) -> StoreResult<ScopeSet>;

    /// Add `scopes` to what was already granted.
    async fn grant(&self, client_id: &str, subject: &str, scopes: &ScopeSet) -> StoreResult<()>;

    /// Forget every grant for the pair.
    async fn revoke(&self, client_id: &str, subject: &str) -> StoreResult<()>;
}

/// Whether the end-user must be asked before `requested` is granted.
///
/// `openid` alone never needs consent.
#[must_use]
pub fn requires_consent(
    client: &RegisteredClient,
    granted: &ScopeSet,
    requested: &ScopeSet,
) -> bool {
    client.settings.require_consent && !requested.without(OPENID).is_subset(granted)
}

/// In-memory consent store.
#[derive(Debug, Default)]
pub struct InMemoryConsentStore {
    grants: RwLock<HashMap<(String, String), ScopeSet>>,
}

impl InMemoryConsentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConsentStore for InMemoryConsentStore {
    async fn granted(&self, client_id: &str, subject: &str) -> StoreResult<ScopeSet> {
        let key = (client_id.to_owned(), subject.to_owned());
        Ok(self.grants.read().await.get(&key).cloned().unwrap_or_default())
    }

    async fn grant(&self, client_id: &str, subject: &str, scopes: &ScopeSet) -> StoreResult<()> {
        let key = (client_id.to_owned(), subject.to_owned());
        let mut grants = self.grants.write().await;
        let entry = grants.entry(key).or_default();
        *entry = entry.union(scopes);
        tracing::debug!(client_id = %client_id, scope = %entry, "Recorded consent");
        Ok(())
    }

    async fn revoke(&self, client_id: &str, subject: &str) -> StoreResult<()> {
        let key = (client_id.to_owned(), subject.to_owned());
        self.grants.write().await.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(require_consent: bool) -> RegisteredClient {
        RegisteredClient::builder("c1")
            .redirect_uri("https://app/cb")
            .scope(OPENID)
            .scope("read")
            .scope("write")
            .require_consent(require_consent)
            .build()
            .unwrap()
    }

    fn scopes(s: &str) -> ScopeSet {
        ScopeSet::parse(s).unwrap()
    }

    #[test]
    fn test_client_without_consent_requirement() {
        assert!(!requires_consent(&client(false), &ScopeSet::new(), &scopes("read write")));
    }

    #[test]
    fn test_openid_alone_needs_no_consent() {
        assert!(!requires_consent(&client(true), &ScopeSet::new(), &scopes("openid")));
    }

    #[test]
    fn test_new_scope_needs_consent() {
        assert!(requires_consent(&client(true), &scopes("read"), &scopes("openid read write")));
        assert!(!requires_consent(&client(true), &scopes("read write"), &scopes("openid read")));
    }

    #[tokio::test]
    async fn test_grant_accumulates_and_revoke_clears() {
        let store = InMemoryConsentStore::new();
        store.grant("c1", "alice", &scopes("read")).await.unwrap();
        store.grant("c1", "alice", &scopes("write")).await.unwrap();
        assert_eq!(store.granted("c1", "alice").await.unwrap(), scopes("read write"));
        assert!(store.granted("c1", "bob").await.unwrap().is_empty());

        store.revoke("c1", "alice").await.unwrap();
        assert!(store.granted("c1", "alice").await.unwrap().is_empty());
    }
}
