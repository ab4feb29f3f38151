//! Opaque refresh tokens and grant family revocation.
//!
//! Records are keyed by the SHA-256 digest of the token, so the store never
//! holds a usable credential.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::StoreResult;
use crate::scope::ScopeSet;
use crate::store;

/// A stored refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    /// `store::digest` of the token value.
    pub token_hash: String,
    pub client_id: String,
    pub subject: String,
    pub scopes: ScopeSet,
    pub grant_id: String,
    pub auth_time: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl RefreshTokenRecord {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        store::is_expired(self.expires_at, now)
    }
}

/// Result of presenting a refresh token for use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TakeOutcome {
    /// Usable. When rotating, the stored record is now revoked.
    Active(RefreshTokenRecord),
    /// Revoked earlier, possibly by rotation: a replay.
    Revoked { grant_id: String },
    Expired,
    NotFound,
}

/// Storage for refresh tokens and revoked grant families.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert(&self, record: RefreshTokenRecord) -> StoreResult<()>;

    /// Read a record without changing it.
    async fn find(&self, token_hash: &str) -> StoreResult<Option<RefreshTokenRecord>>;

    /// Check a token for use and, if `rotate`, revoke it in the same step.
    async fn take(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
        rotate: bool,
    ) -> StoreResult<TakeOutcome>;

    /// Revoke every refresh token of a grant and remember the family as
    /// revoked until `retain_until`.
    async fn revoke_family(&self, grant_id: &str, retain_until: DateTime<Utc>) -> StoreResult<()>;

    async fn is_family_revoked(&self, grant_id: &str) -> StoreResult<bool>;

    /// Drop expired records and family markers. Returns how many went.
    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<usize>;
}

#[derive(Default)]
struct State {
    tokens: HashMap<String, RefreshTokenRecord>,
    revoked_families: HashMap<String, DateTime<Utc>>,
}

/// In-memory refresh token store.
#[derive(Default)]
pub struct InMemoryRefreshTokenStore {
    state: RwLock<State>,
}

impl InMemoryRefreshTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn insert(&self, record: RefreshTokenRecord) -> StoreResult<()> {
        self.state.write().await.tokens.insert(record.token_hash.clone(), record);
        Ok(())
    }

    async fn find(&self, token_hash: &str) -> StoreResult<Option<RefreshTokenRecord>> {
        Ok(self.state.read().await.tokens.get(token_hash).cloned())
    }

    async fn take(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
        rotate: bool,
    ) -> StoreResult<TakeOutcome> {
        let mut state = self.state.write().await;
        let family_revoked = state
            .tokens
            .get(token_hash)
            .is_some_and(|r| state.revoked_families.contains_key(&r.grant_id));

        let Some(record) = state.tokens.get_mut(token_hash) else {
            return Ok(TakeOutcome::NotFound);
        };
        if record.revoked || family_revoked {
            return Ok(TakeOutcome::Revoked {
                grant_id: record.grant_id.clone(),
            });
        }
        if record.is_expired(now) {
            return Ok(TakeOutcome::Expired);
        }
        if rotate {
            record.revoked = true;
        }
        Ok(TakeOutcome::Active(record.clone()))
    }

    async fn revoke_family(&self, grant_id: &str, retain_until: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let mut count = 0usize;
        for record in state.tokens.values_mut().filter(|r| r.grant_id == grant_id) {
            record.revoked = true;
            count += 1;
        }
        let marker = state.revoked_families.entry(grant_id.to_owned()).or_insert(retain_until);
        *marker = (*marker).max(retain_until);
        tracing::info!(grant_id = %grant_id, refresh_tokens = count, "Revoked grant family");
        Ok(())
    }

    async fn is_family_revoked(&self, grant_id: &str) -> StoreResult<bool> {
        Ok(self.state.read().await.revoked_families.contains_key(grant_id))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let mut state = self.state.write().await;
        let before = state.tokens.len() + state.revoked_families.len();
        state.tokens.retain(|_, r| !r.is_expired(now));
        state.revoked_families.retain(|_, until| now < *until);
        Ok(before - state.tokens.len() - state.revoked_families.len())
    }
}

impl fmt::Debug for InMemoryRefreshTokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRefreshTokenStore").finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn record(hash: &str, grant: &str, ttl: Duration) -> RefreshTokenRecord {
        let now = Utc::now();
        RefreshTokenRecord {
            token_hash: hash.into(),
            client_id: "c1".into(),
            subject: "alice".into(),
            scopes: ScopeSet::parse("read").unwrap(),
            grant_id: grant.into(),
            auth_time: now,
            issued_at: now,
            expires_at: store::expiry_from(now, ttl),
            revoked: false,
        }
    }

    #[tokio::test]
    async fn test_take_with_rotation() {
        let store = InMemoryRefreshTokenStore::new();
        store.insert(record("h1", "g1", Duration::from_secs(60))).await.unwrap();

        let first = store.take("h1", Utc::now(), true).await.unwrap();
        assert!(matches!(first, TakeOutcome::Active(_)));
        assert_eq!(
            store.take("h1", Utc::now(), true).await.unwrap(),
            TakeOutcome::Revoked { grant_id: "g1".into() }
        );
    }

    #[tokio::test]
    async fn test_take_without_rotation_is_repeatable() {
        let store = InMemoryRefreshTokenStore::new();
        store.insert(record("h1", "g1", Duration::from_secs(60))).await.unwrap();
        for _ in 0..3 {
            let outcome = store.take("h1", Utc::now(), false).await.unwrap();
            assert!(matches!(outcome, TakeOutcome::Active(_)));
        }
    }

    #[tokio::test]
    async fn test_family_revocation() {
        let store = InMemoryRefreshTokenStore::new();
        store.insert(record("h1", "g1", Duration::from_secs(60))).await.unwrap();
        store.insert(record("h2", "g1", Duration::from_secs(60))).await.unwrap();
        store.insert(record("h3", "g2", Duration::from_secs(60))).await.unwrap();

        let until = Utc::now() + chrono::TimeDelta::seconds(60);
        store.revoke_family("g1", until).await.unwrap();

        assert!(store.is_family_revoked("g1").await.unwrap());
        assert!(!store.is_family_revoked("g2").await.unwrap());
        assert!(store.find("h2").await.unwrap().unwrap().revoked);
        let unrelated = store.take("h3", Utc::now(), true).await.unwrap();
        assert!(matches!(unrelated, TakeOutcome::Active(_)));
    }

    #[tokio::test]
    async fn test_expired_and_purge() {
        let store = InMemoryRefreshTokenStore::new();
        store.insert(record("h1", "g1", Duration::ZERO)).await.unwrap();
        assert_eq!(store.take("h1", Utc::now(), true).await.unwrap(), TakeOutcome::Expired);
        assert_eq!(store.take("nope", Utc::now(), true).await.unwrap(), TakeOutcome::NotFound);

        store.revoke_family("g9", Utc::now()).await.unwrap();
        assert_eq!(store.purge_expired(Utc::now()).await.unwrap(), 2);
    }
}
