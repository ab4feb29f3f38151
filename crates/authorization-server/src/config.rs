//! Configuration for the authorization server.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Context;

use crate::clients::GrantType;
use crate::scope::ScopeSet;

/// Default values.
pub mod defaults {
    use std::time::Duration;

    /// Issuer identifier (`iss` claim, metadata `issuer`).
    pub const ISSUER: &str = "http://localhost:8033";

    /// HTTP listen port.
    pub const PORT: u16 = 8033;

    /// Audience stamped into access tokens.
    pub const AUDIENCE: &str = "resource-server";

    /// Authorization code lifetime (5 minutes).
    pub const AUTH_CODE_TTL: Duration = Duration::from_secs(300);

    /// Access token lifetime (5 minutes).
    pub const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(300);

    /// Refresh token lifetime (1 hour).
    pub const REFRESH_TOKEN_TTL: Duration = Duration::from_secs(3600);

    /// ID token lifetime (5 minutes).
    pub const ID_TOKEN_TTL: Duration = Duration::from_secs(300);

    /// Upper bound on any single store call.
    pub const STORE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Sweep interval for expired codes and refresh tokens (5 minutes).
    pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

    /// How long retired signing keys stay published (1 day).
    pub const KEY_RETENTION: Duration = Duration::from_secs(24 * 3600);

    /// RSA modulus size for generated keys.
    pub const KEY_BITS: usize = 2048;

    /// Header carrying the subject authenticated by the login front end.
    pub const SUBJECT_HEADER: &str = "x-authenticated-user";

    /// Clock skew tolerated when checking `exp` and `nbf`.
    pub const LEEWAY: Duration = Duration::ZERO;

    /// Scopes advertised in metadata.
    pub const SCOPES_SUPPORTED: &str = "openid profile message.read message.write";
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Issuer identifier; also the base URL for metadata endpoints.
    pub issuer: String,

    /// Audience of issued access tokens and the one the bearer guard expects.
    pub audience: String,

    pub auth_code_ttl: Duration,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub id_token_ttl: Duration,

    /// Upper bound on any single store call.
    pub store_timeout: Duration,

    /// Sweep interval for expired codes and refresh tokens.
    pub cleanup_interval: Duration,

    /// How long a retired signing key stays in the JWK set.
    pub key_retention: Duration,

    /// RSA modulus size for generated keys.
    pub key_bits: usize,

    /// Header trusted to carry the authenticated end-user.
    pub subject_header: String,

    /// Grants this server will serve at all.
    pub enabled_grants: BTreeSet<GrantType>,

    /// Whether `code_challenge_method=plain` is accepted.
    pub allow_plain_pkce: bool,

    /// Whether `POST /register` is open.
    pub allow_dynamic_registration: bool,

    /// Clock skew tolerated when checking `exp` and `nbf`.
    pub leeway: Duration,

    /// Scopes advertised in metadata.
    pub scopes_supported: ScopeSet,
}

impl Config {
    /// Create a configuration for the given issuer with default settings.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into().trim_end_matches('/').to_owned(),
            audience: defaults::AUDIENCE.to_owned(),
            auth_code_ttl: defaults::AUTH_CODE_TTL,
            access_token_ttl: defaults::ACCESS_TOKEN_TTL,
            refresh_token_ttl: defaults::REFRESH_TOKEN_TTL,
            id_token_ttl: defaults::ID_TOKEN_TTL,
            store_timeout: defaults::STORE_TIMEOUT,
            cleanup_interval: defaults::CLEANUP_INTERVAL,
            key_retention: defaults::KEY_RETENTION,
            key_bits: defaults::KEY_BITS,
            subject_header: defaults::SUBJECT_HEADER.to_owned(),
            enabled_grants: [
                GrantType::AuthorizationCode,
                GrantType::ClientCredentials,
                GrantType::RefreshToken,
            ]
            .into_iter()
            .collect(),
            allow_plain_pkce: true,
            allow_dynamic_registration: false,
            leeway: defaults::LEEWAY,
            scopes_supported: defaults::SCOPES_SUPPORTED
                .split(' ')
                .collect(),
        }
    }

    /// Create a test configuration with a fixed issuer and short store bound.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            store_timeout: Duration::from_secs(1),
            ..Self::new("https://auth.test")
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns error if environment variables are invalid.
    pub fn from_env() -> anyhow::Result<Self> {
        let issuer = std::env::var("ISSUER").unwrap_or_else(|_| defaults::ISSUER.to_owned());
        let mut config = Self::new(issuer);

        if let Ok(audience) = std::env::var("AUDIENCE") {
            config.audience = audience;
        }
        if let Some(ttl) = env_secs("ACCESS_TOKEN_TTL_SECS")? {
            config.access_token_ttl = ttl;
        }
        if let Some(ttl) = env_secs("REFRESH_TOKEN_TTL_SECS")? {
            config.refresh_token_ttl = ttl;
        }
        if let Some(ttl) = env_secs("AUTH_CODE_TTL_SECS")? {
            config.auth_code_ttl = ttl;
        }
        if let Some(timeout) = env_secs("STORE_TIMEOUT_SECS")? {
            config.store_timeout = timeout;
        }
        if let Ok(header) = std::env::var("SUBJECT_HEADER") {
            config.subject_header = header.to_ascii_lowercase();
        }
        if let Ok(flag) = std::env::var("ALLOW_PLAIN_PKCE") {
            config.allow_plain_pkce =
                flag.parse().with_context(|| format!("ALLOW_PLAIN_PKCE={flag} is not a bool"))?;
        }
        Ok(config)
    }

    /// Also serve the deprecated `password` and `implicit` grants.
    #[must_use]
    pub fn with_legacy_grants(mut self) -> Self {
        self.enabled_grants.extend(GrantType::ALL.into_iter().filter(|g| g.is_legacy()));
        self
    }

    /// Whether this server serves the grant at all.
    #[must_use]
    pub fn grant_enabled(&self, grant: GrantType) -> bool {
        self.enabled_grants.contains(&grant)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(defaults::ISSUER)
    }
}

fn env_secs(name: &str) -> anyhow::Result<Option<Duration>> {
    std::env::var(name)
        .ok()
        .map(|raw| {
            raw.parse::<u64>()
                .map(Duration::from_secs)
                .with_context(|| format!("{name}={raw} is not a number of seconds"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.issuer, defaults::ISSUER);
        assert!(config.grant_enabled(GrantType::AuthorizationCode));
        assert!(config.grant_enabled(GrantType::RefreshToken));
        assert!(!config.grant_enabled(GrantType::Password));
        assert!(!config.grant_enabled(GrantType::Implicit));
        assert!(!config.allow_dynamic_registration);
    }

    #[test]
    fn test_legacy_grants_are_opt_in() {
        let config = Config::default().with_legacy_grants();
        assert!(config.grant_enabled(GrantType::Password));
        assert!(config.grant_enabled(GrantType::Implicit));
        assert!(GrantType::ALL.iter().all(|g| config.grant_enabled(*g)));
    }

    #[test]
    fn test_issuer_trailing_slash_trimmed() {
        assert_eq!(Config::new("https://auth.example/").issuer, "https://auth.example");
    }

    #[test]
    fn test_scopes_supported() {
        assert!(Config::default().scopes_supported.contains("openid"));
    }
}
