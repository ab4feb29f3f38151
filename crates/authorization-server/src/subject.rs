//! End-user identity. Login itself happens outside this server.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use axum::http::HeaderMap;

use crate::clients::{ClientError, secret};

/// Finds the end-user an external login front end authenticated.
pub trait SubjectResolver: Send + Sync {
    fn resolve(&self, headers: &HeaderMap) -> Option<String>;
}

/// Trusts a single request header set by an authenticating proxy.
#[derive(Debug, Clone)]
pub struct HeaderSubjectResolver {
    header: String,
}

impl HeaderSubjectResolver {
    #[must_use]
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into().to_ascii_lowercase(),
        }
    }
}

impl SubjectResolver for HeaderSubjectResolver {
    fn resolve(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get(self.header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
    }
}

/// Checks username and password for the legacy `password` grant.
#[async_trait]
pub trait ResourceOwnerVerifier: Send + Sync {
    /// The subject for valid credentials, `None` otherwise.
    async fn verify(&self, username: &str, password: &str) -> Option<String>;
}

/// A fixed set of users with Argon2id password hashes.
#[derive(Default)]
pub struct StaticResourceOwners {
    users: HashMap<String, String>,
}

impl StaticResourceOwners {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user, hashing the plaintext password.
    pub fn with_user(
        mut self,
        username: impl Into<String>,
        password: &str,
    ) -> Result<Self, ClientError> {
        self.users.insert(username.into(), secret::hash_secret(password)?);
        Ok(self)
    }
}

#[async_trait]
impl ResourceOwnerVerifier for StaticResourceOwners {
    async fn verify(&self, username: &str, password: &str) -> Option<String> {
        let stored = self.users.get(username)?.clone();
        let password = password.to_owned();
        let matches = tokio::task::spawn_blocking(move || secret::verify_secret(&password, &stored))
            .await
            .unwrap_or(false);
        matches.then(|| username.to_owned())
    }
}

impl fmt::Debug for StaticResourceOwners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticResourceOwners").field("users", &self.users.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_header_resolver() {
        let resolver = HeaderSubjectResolver::new("X-Authenticated-User");
        let mut headers = HeaderMap::new();
        assert_eq!(resolver.resolve(&headers), None);

        headers.insert("x-authenticated-user", HeaderValue::from_static("  "));
        assert_eq!(resolver.resolve(&headers), None);

        headers.insert("x-authenticated-user", HeaderValue::from_static("alice"));
        assert_eq!(resolver.resolve(&headers).as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_static_owners() {
        let owners = StaticResourceOwners::new().with_user("user", "password").unwrap();
        assert_eq!(owners.verify("user", "password").await.as_deref(), Some("user"));
        assert_eq!(owners.verify("user", "wrong").await, None);
        assert_eq!(owners.verify("nobody", "password").await, None);
    }
}
