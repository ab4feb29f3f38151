//! Loading client registrations from a JSON document.
//!
//! ```json
//! {
//!   "clients": [{
//!     "client_id": "messaging-client",
//!     "client_secret": "secret",
//!     "authentication_methods": ["client_secret_basic"],
//!     "grant_types": ["authorization_code", "refresh_token", "client_credentials"],
//!     "redirect_uris": ["http://127.0.0.1:8080/authorized"],
//!     "scopes": "openid message.read message.write",
//!     "require_consent": true
//!   }]
//! }
//! ```
//!
//! `client_secret` is hashed at load time; `client_secret_hash` takes a PHC string as-is.

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{ClientAuthMethod, GrantType, RegisteredClient, TokenSettings};
use crate::scope::ScopeSet;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClientsDocument {
    clients: Vec<ClientDefinition>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClientDefinition {
    client_id: String,
    client_name: Option<String>,
    client_secret: Option<String>,
    client_secret_hash: Option<String>,
    client_secret_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    authentication_methods: Vec<ClientAuthMethod>,
    #[serde(default)]
    grant_types: Vec<GrantType>,
    #[serde(default)]
    redirect_uris: Vec<String>,
    #[serde(default)]
    scopes: ScopeSet,
    #[serde(default)]
    require_pkce: bool,
    #[serde(default)]
    require_consent: bool,
    access_token_ttl_secs: Option<u64>,
    refresh_token_ttl_secs: Option<u64>,
    #[serde(default)]
    reuse_refresh_tokens: bool,
}

impl ClientDefinition {
    fn into_client(self) -> anyhow::Result<RegisteredClient> {
        let client_id = self.client_id.clone();
        let mut builder = RegisteredClient::builder(self.client_id)
            .scopes(&self.scopes)
            .require_pkce(self.require_pkce)
            .require_consent(self.require_consent)
            .token_settings(TokenSettings {
                access_token_ttl: self.access_token_ttl_secs.map(std::time::Duration::from_secs),
                refresh_token_ttl: self.refresh_token_ttl_secs.map(std::time::Duration::from_secs),
                reuse_refresh_tokens: self.reuse_refresh_tokens,
            });

        builder = match (self.client_secret, self.client_secret_hash) {
            (Some(_), Some(_)) => {
                anyhow::bail!("client {client_id}: set client_secret or client_secret_hash, not both")
            }
            (Some(plain), None) => builder.client_secret(plain),
            (None, Some(hash)) => builder.client_secret_hash(hash),
            (None, None) => builder,
        };
        if let Some(name) = self.client_name {
            builder = builder.client_name(name);
        }
        if let Some(expires) = self.client_secret_expires_at {
            builder = builder.client_secret_expires_at(expires);
        }
        for method in self.authentication_methods {
            builder = builder.authentication_method(method);
        }
        for grant in self.grant_types {
            builder = builder.grant_type(grant);
        }
        for uri in self.redirect_uris {
            builder = builder.redirect_uri(uri);
        }

        builder.build().with_context(|| format!("client {client_id}"))
    }
}

/// Parse a clients document from a JSON string.
pub fn parse_clients(json: &str) -> anyhow::Result<Vec<RegisteredClient>> {
    let document: ClientsDocument =
        serde_json::from_str(json).context("Failed to parse clients document")?;
    document.clients.into_iter().map(ClientDefinition::into_client).collect()
}

/// Load client registrations from a JSON file.
pub fn load_clients(path: &Path) -> anyhow::Result<Vec<RegisteredClient>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read clients file {}", path.display()))?;
    let clients = parse_clients(&json)?;
    tracing::info!(path = %path.display(), count = clients.len(), "Loaded client registrations");
    Ok(clients)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample_document() {
        let clients = parse_clients(
            r#"{"clients": [{
                "client_id": "messaging-client",
                "client_secret": "secret",
                "grant_types": ["authorization_code", "refresh_token", "client_credentials"],
                "redirect_uris": ["http://127.0.0.1:8080/authorized"],
                "scopes": "openid message.read message.write",
                "require_consent": true
            }]}"#,
        )
        .unwrap();

        assert_eq!(clients.len(), 1);
        let client = &clients[0];
        assert!(!client.is_public());
        assert!(client.allows_method(ClientAuthMethod::ClientSecretBasic));
        assert!(client.scopes.contains("message.write"));
        assert!(client.settings.require_consent);
    }

    #[test]
    fn test_rejects_both_secret_forms() {
        let err = parse_clients(
            r#"{"clients": [{"client_id": "c", "client_secret": "a", "client_secret_hash": "b",
                "grant_types": ["client_credentials"]}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not both"));
    }

    #[test]
    fn test_rejects_unknown_fields() {
        assert!(parse_clients(r#"{"clients": [{"client_id": "c", "secret": "x"}]}"#).is_err());
    }
}
