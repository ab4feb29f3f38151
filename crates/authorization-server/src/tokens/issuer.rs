//! Token endpoint grants (RFC 6749 §4, §6).

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::claims::{AccessTokenClaims, IdTokenClaims};
use super::refresh::{RefreshTokenRecord, RefreshTokenStore, TakeOutcome};
use super::{family_retention, seconds};
use crate::authorize::AuthorizationRequest;
use crate::clients::{ClientRepository, GrantType, RegisteredClient, TokenSettings};
use crate::codes::{AuthorizationCodes, CodeRejection, Redemption};
use crate::config::Config;
use crate::error::{OAuthError, OAuthResult};
use crate::keys::KeyManager;
use crate::params::Params;
use crate::scope::{OPENID, ScopeSet};
use crate::store;
use crate::subject::ResourceOwnerVerifier;

/// A parsed token request, one variant per grant.
#[derive(Clone, PartialEq, Eq)]
pub enum TokenRequest {
    AuthorizationCode {
        code: String,
        redirect_uri: Option<String>,
        code_verifier: Option<String>,
    },
    ClientCredentials {
        scope: Option<ScopeSet>,
    },
    RefreshToken {
        refresh_token: String,
        scope: Option<ScopeSet>,
    },
    /// Resource owner password credentials. Opt-in only.
    Password {
        username: String,
        password: String,
        scope: Option<ScopeSet>,
    },
}

impl TokenRequest {
    /// Parse the grant-specific fields of a token request body.
    pub fn from_params(params: &Params) -> OAuthResult<Self> {
        let grant_type = params.require("grant_type")?;
        let owned = |name: &str| -> OAuthResult<String> { params.require(name).map(str::to_owned) };
        let optional = |name: &str| -> OAuthResult<Option<String>> {
            Ok(params.get(name)?.map(str::to_owned))
        };
        let scope = || -> OAuthResult<Option<ScopeSet>> {
            params.get("scope")?.map(ScopeSet::parse).transpose()
        };

        match grant_type {
            "authorization_code" => Ok(Self::AuthorizationCode {
                code: owned("code")?,
                redirect_uri: optional("redirect_uri")?,
                code_verifier: optional("code_verifier")?,
            }),
            "client_credentials" => Ok(Self::ClientCredentials { scope: scope()? }),
            "refresh_token" => Ok(Self::RefreshToken {
                refresh_token: owned("refresh_token")?,
                scope: scope()?,
            }),
            "password" => Ok(Self::Password {
                username: owned("username")?,
                password: owned("password")?,
                scope: scope()?,
            }),
            other => Err(OAuthError::unsupported_grant_type(format!(
                "grant_type {other} is not supported"
            ))),
        }
    }

    #[must_use]
    pub const fn grant_type(&self) -> GrantType {
        match self {
            Self::AuthorizationCode { .. } => GrantType::AuthorizationCode,
            Self::ClientCredentials { .. } => GrantType::ClientCredentials,
            Self::RefreshToken { .. } => GrantType::RefreshToken,
            Self::Password { .. } => GrantType::Password,
        }
    }
}

impl fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRequest").field("grant_type", &self.grant_type()).finish()
    }
}

/// Successful token endpoint response (RFC 6749 §5.1).
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(skip_serializing_if = "ScopeSet::is_empty")]
    pub scope: ScopeSet,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.is_some())
            .field("id_token", &self.id_token.is_some())
            .field("scope", &self.scope)
            .finish()
    }
}

/// What a set of tokens is minted for.
struct Grant<'a> {
    client: &'a RegisteredClient,
    subject: String,
    scopes: ScopeSet,
    grant_id: String,
    auth_time: DateTime<Utc>,
    nonce: Option<String>,
}

/// Mints tokens for the grants this server serves.
pub struct TokenIssuer {
    config: Arc<Config>,
    keys: Arc<KeyManager>,
    clients: Arc<dyn ClientRepository>,
    codes: AuthorizationCodes,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    resource_owners: Option<Arc<dyn ResourceOwnerVerifier>>,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        keys: Arc<KeyManager>,
        clients: Arc<dyn ClientRepository>,
        codes: AuthorizationCodes,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
    ) -> Self {
        Self {
            config,
            keys,
            clients,
            codes,
            refresh_tokens,
            resource_owners: None,
        }
    }

    /// Source of users for the `password` grant.
    #[must_use]
    pub fn with_resource_owners(mut self, owners: Arc<dyn ResourceOwnerVerifier>) -> Self {
        self.resource_owners = Some(owners);
        self
    }

    /// Run a token request for an authenticated client.
    pub async fn exchange(
        &self,
        client: &RegisteredClient,
        request: TokenRequest,
    ) -> OAuthResult<TokenResponse> {
        let grant_type = request.grant_type();
        if !self.config.grant_enabled(grant_type) {
            let status = if grant_type.is_legacy() { "deprecated and " } else { "" };
            return Err(OAuthError::unsupported_grant_type(format!(
                "grant_type {grant_type} is {status}not enabled"
            )));
        }
        if !client.allows_grant(grant_type) {
            tracing::warn!(
                client_id = %client.client_id,
                grant_type = %grant_type,
                "Client not registered for grant"
            );
            return Err(OAuthError::unauthorized_client(format!(
                "client may not use grant_type {grant_type}"
            )));
        }

        let response = match request {
            TokenRequest::AuthorizationCode {
                code,
                redirect_uri,
                code_verifier,
            } => {
                let redirect_uri = redirect_uri.as_deref();
                let code_verifier = code_verifier.as_deref();
                self.authorization_code(client, &code, redirect_uri, code_verifier).await?
            }
            TokenRequest::ClientCredentials { scope } => self.client_credentials(client, scope)?,
            TokenRequest::RefreshToken {
                refresh_token,
                scope,
            } => self.refresh(client, &refresh_token, scope).await?,
            TokenRequest::Password {
                username,
                password,
                scope,
            } => self.password(client, &username, &password, scope).await?,
        };

        tracing::info!(
            client_id = %client.client_id,
            grant_type = %grant_type,
            scope = %response.scope,
            "Issued tokens"
        );
        Ok(response)
    }

    // ─── Grants ─────────────────────────────────────────────────────────────

    async fn authorization_code(
        &self,
        client: &RegisteredClient,
        code: &str,
        redirect_uri: Option<&str>,
        code_verifier: Option<&str>,
    ) -> OAuthResult<TokenResponse> {
        let redeemed = self
            .codes
            .redeem(Redemption {
                code,
                client_id: &client.client_id,
                redirect_uri,
                code_verifier,
            })
            .await;

        let code = match redeemed {
            Ok(code) => code,
            Err(CodeRejection::Replayed {
                grant_id,
                client_id,
            }) => {
                let owner = self.owner_settings(client, &client_id).await?;
                self.revoke_family(&grant_id, owner).await?;
                return Err(OAuthError::invalid_grant("authorization code was already used"));
            }
            Err(other) => return Err(other.into()),
        };

        let grant = Grant {
            client,
            subject: code.subject,
            scopes: code.scopes.intersection(&client.scopes),
            grant_id: code.grant_id,
            auth_time: code.auth_time,
            nonce: code.nonce,
        };
        let with_refresh = self.refresh_allowed(client);
        let with_id_token = grant.scopes.contains(OPENID);
        self.mint(&grant, with_refresh, with_id_token).await
    }

    fn client_credentials(
        &self,
        client: &RegisteredClient,
        requested: Option<ScopeSet>,
    ) -> OAuthResult<TokenResponse> {
        let scopes = narrow(requested, &client.scopes)?;
        let grant = Grant {
            client,
            subject: client.client_id.clone(),
            scopes,
            grant_id: uuid::Uuid::new_v4().to_string(),
            auth_time: Utc::now(),
            nonce: None,
        };
        let (access_token, expires_in) = self.mint_access_token(&grant, Utc::now())?;
        Ok(TokenResponse {
            access_token,
            token_type: "Bearer",
            expires_in,
            refresh_token: None,
            id_token: None,
            scope: grant.scopes,
        })
    }

    async fn refresh(
        &self,
        client: &RegisteredClient,
        refresh_token: &str,
        requested: Option<ScopeSet>,
    ) -> OAuthResult<TokenResponse> {
        let hash = store::digest(refresh_token);
        let timeout = self.config.store_timeout;

        // Another client's token is rejected without consuming it.
        let issued_to = store::bounded(timeout, self.refresh_tokens.find(&hash)).await?;
        match issued_to {
            Some(record) if record.client_id == client.client_id => {}
            Some(_) => {
                tracing::warn!(
                    client_id = %client.client_id,
                    "Refresh token presented by another client"
                );
                return Err(OAuthError::invalid_grant("refresh token is invalid"));
            }
            None => return Err(OAuthError::invalid_grant("refresh token is invalid")),
        }

        let rotate = !client.token_settings.reuse_refresh_tokens;
        let outcome =
            store::bounded(timeout, self.refresh_tokens.take(&hash, Utc::now(), rotate)).await?;
        let record = match outcome {
            TakeOutcome::Active(record) => record,
            TakeOutcome::Revoked { grant_id } => {
                tracing::warn!(
                    client_id = %client.client_id,
                    grant_id = %grant_id,
                    "Revoked refresh token replayed"
                );
                self.revoke_family(&grant_id, client.token_settings).await?;
                return Err(OAuthError::invalid_grant("refresh token is invalid"));
            }
            TakeOutcome::Expired => {
                return Err(OAuthError::invalid_grant("refresh token has expired"));
            }
            TakeOutcome::NotFound => {
                return Err(OAuthError::invalid_grant("refresh token is invalid"));
            }
        };

        let scopes = narrow(requested, &record.scopes)?.intersection(&client.scopes);
        let now = Utc::now();
        let grant = Grant {
            client,
            subject: record.subject.clone(),
            scopes: scopes.clone(),
            grant_id: record.grant_id.clone(),
            auth_time: record.auth_time,
            nonce: None,
        };
        let (access_token, expires_in) = self.mint_access_token(&grant, now)?;
        let id_token = if scopes.contains(OPENID) {
            Some(self.mint_id_token(&grant, now)?)
        } else {
            None
        };
        let refresh_token = if rotate {
            // The new token keeps the scope of the original grant.
            let family = Grant {
                scopes: record.scopes,
                ..grant
            };
            self.mint_refresh_token(&family, now).await?
        } else {
            refresh_token.to_owned()
        };

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer",
            expires_in,
            refresh_token: Some(refresh_token),
            id_token,
            scope: scopes,
        })
    }

    async fn password(
        &self,
        client: &RegisteredClient,
        username: &str,
        password: &str,
        requested: Option<ScopeSet>,
    ) -> OAuthResult<TokenResponse> {
        let Some(owners) = &self.resource_owners else {
            return Err(OAuthError::unsupported_grant_type(
                "no resource owner source is configured",
            ));
        };
        let Some(subject) = owners.verify(username, password).await else {
            tracing::warn!(client_id = %client.client_id, "Resource owner credentials rejected");
            return Err(OAuthError::invalid_grant("invalid resource owner credentials"));
        };

        let grant = Grant {
            client,
            subject,
            scopes: narrow(requested, &client.scopes)?,
            grant_id: uuid::Uuid::new_v4().to_string(),
            auth_time: Utc::now(),
            nonce: None,
        };
        self.mint(&grant, self.refresh_allowed(client), false).await
    }

    /// Access token for the implicit grant, delivered in the redirect fragment.
    pub fn implicit(
        &self,
        client: &RegisteredClient,
        request: &AuthorizationRequest,
        subject: &str,
        granted: ScopeSet,
    ) -> OAuthResult<TokenResponse> {
        if !self.config.grant_enabled(GrantType::Implicit)
            || !client.allows_grant(GrantType::Implicit)
        {
            return Err(OAuthError::unauthorized_client("implicit grant is not allowed"));
        }
        let grant = Grant {
            client,
            subject: subject.to_owned(),
            scopes: granted.intersection(&client.scopes),
            grant_id: uuid::Uuid::new_v4().to_string(),
            auth_time: Utc::now(),
            nonce: request.nonce.clone(),
        };
        let (access_token, expires_in) = self.mint_access_token(&grant, Utc::now())?;
        Ok(TokenResponse {
            access_token,
            token_type: "Bearer",
            expires_in,
            refresh_token: None,
            id_token: None,
            scope: grant.scopes,
        })
    }

    // ─── Minting ────────────────────────────────────────────────────────────

    async fn mint(
        &self,
        grant: &Grant<'_>,
        with_refresh: bool,
        with_id_token: bool,
    ) -> OAuthResult<TokenResponse> {
        let now = Utc::now();
        let (access_token, expires_in) = self.mint_access_token(grant, now)?;
        let refresh_token = if with_refresh {
            Some(self.mint_refresh_token(grant, now).await?)
        } else {
            None
        };
        let id_token = if with_id_token {
            Some(self.mint_id_token(grant, now)?)
        } else {
            None
        };

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer",
            expires_in,
            refresh_token,
            id_token,
            scope: grant.scopes.clone(),
        })
    }

    fn mint_access_token(
        &self,
        grant: &Grant<'_>,
        now: DateTime<Utc>,
    ) -> OAuthResult<(String, u64)> {
        let ttl = grant
            .client
            .token_settings
            .access_token_ttl
            .unwrap_or(self.config.access_token_ttl);
        let iat = now.timestamp();
        let claims = AccessTokenClaims {
            iss: self.config.issuer.clone(),
            sub: grant.subject.clone(),
            aud: self.config.audience.clone(),
            exp: iat.saturating_add(seconds(ttl)),
            iat,
            nbf: iat,
            jti: uuid::Uuid::new_v4().to_string(),
            client_id: grant.client.client_id.clone(),
            scope: grant.scopes.clone(),
            gid: grant.grant_id.clone(),
        };
        let token = self.keys.snapshot().active().sign(&claims, claims.exp)?;
        Ok((token, ttl.as_secs()))
    }

    fn mint_id_token(&self, grant: &Grant<'_>, now: DateTime<Utc>) -> OAuthResult<String> {
        let iat = now.timestamp();
        let claims = IdTokenClaims {
            iss: self.config.issuer.clone(),
            sub: grant.subject.clone(),
            aud: grant.client.client_id.clone(),
            exp: iat.saturating_add(seconds(self.config.id_token_ttl)),
            iat,
            auth_time: grant.auth_time.timestamp(),
            nonce: grant.nonce.clone(),
            azp: grant.client.client_id.clone(),
        };
        Ok(self.keys.snapshot().active().sign(&claims, claims.exp)?)
    }

    async fn mint_refresh_token(
        &self,
        grant: &Grant<'_>,
        now: DateTime<Utc>,
    ) -> OAuthResult<String> {
        let ttl = grant
            .client
            .token_settings
            .refresh_token_ttl
            .unwrap_or(self.config.refresh_token_ttl);
        let token = store::generate_token();
        let record = RefreshTokenRecord {
            token_hash: store::digest(&token),
            client_id: grant.client.client_id.clone(),
            subject: grant.subject.clone(),
            scopes: grant.scopes.clone(),
            grant_id: grant.grant_id.clone(),
            auth_time: grant.auth_time,
            issued_at: now,
            expires_at: store::expiry_from(now, ttl),
            revoked: false,
        };
        store::bounded(self.config.store_timeout, self.refresh_tokens.insert(record)).await?;
        Ok(token)
    }

    fn refresh_allowed(&self, client: &RegisteredClient) -> bool {
        client.allows_grant(GrantType::RefreshToken)
            && self.config.grant_enabled(GrantType::RefreshToken)
    }

    /// Lifetimes of the client a grant was issued to. A registration that
    /// has since vanished falls back to the server defaults.
    async fn owner_settings(
        &self,
        presenter: &RegisteredClient,
        owner_id: &str,
    ) -> OAuthResult<TokenSettings> {
        if presenter.client_id == owner_id {
            return Ok(presenter.token_settings);
        }
        let owner = store::bounded(self.config.store_timeout, self.clients.lookup(owner_id)).await?;
        Ok(owner.map(|c| c.token_settings).unwrap_or_default())
    }

    async fn revoke_family(&self, grant_id: &str, owner: TokenSettings) -> OAuthResult<()> {
        let until = store::expiry_from(Utc::now(), family_retention(&self.config, owner));
        let revoked = self.refresh_tokens.revoke_family(grant_id, until);
        store::bounded(self.config.store_timeout, revoked).await?;
        Ok(())
    }
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer", &self.config.issuer)
            .field("password_grant", &self.resource_owners.is_some())
            .finish()
    }
}

/// Requested scope, which must stay within `allowed`; absent means all of it.
fn narrow(requested: Option<ScopeSet>, allowed: &ScopeSet) -> OAuthResult<ScopeSet> {
    match requested {
        None => Ok(allowed.clone()),
        Some(scopes) if scopes.is_subset(allowed) => Ok(scopes),
        Some(_) => Err(OAuthError::invalid_scope("requested scope exceeds the grant")),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::authorize::ResponseType;
    use crate::clients::ClientAuthMethod;
    use crate::pkce::CodeChallengeMethod;
    use crate::subject::StaticResourceOwners;
    use crate::tokens::test_support::{Fixture, fixture};

    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    fn messaging_client() -> RegisteredClient {
        RegisteredClient::builder("messaging-client")
            .client_secret("secret")
            .authentication_method(ClientAuthMethod::ClientSecretBasic)
            .grant_type(GrantType::AuthorizationCode)
            .grant_type(GrantType::RefreshToken)
            .grant_type(GrantType::ClientCredentials)
            .redirect_uri("http://127.0.0.1:8080/authorized")
            .scope(OPENID)
            .scope("message.read")
            .scope("message.write")
            .build()
            .unwrap()
    }

    fn scopes(s: &str) -> ScopeSet {
        ScopeSet::parse(s).unwrap()
    }

    async fn code_for(f: &Fixture, client: &RegisteredClient, scope: &str) -> String {
        let request = AuthorizationRequest {
            client_id: client.client_id.clone(),
            redirect_uri: client.redirect_uris[0].clone(),
            redirect_uri_supplied: true,
            response_type: ResponseType::Code,
            scopes: scopes(scope),
            state: None,
            code_challenge: Some(CHALLENGE.into()),
            code_challenge_method: Some(CodeChallengeMethod::S256),
            nonce: Some("n-0S6_WzA2Mj".into()),
            prompt_none: false,
        };
        f.codes.issue(&request, "user1", request.scopes.clone()).await.unwrap().value
    }

    fn code_request(code: String) -> TokenRequest {
        TokenRequest::AuthorizationCode {
            code,
            redirect_uri: Some("http://127.0.0.1:8080/authorized".into()),
            code_verifier: Some(VERIFIER.into()),
        }
    }

    #[tokio::test]
    async fn test_authorization_code_grant_with_openid() {
        let f = fixture(Config::for_testing());
        let client = messaging_client();
        let code = code_for(&f, &client, "openid message.read").await;

        let response = f.issuer.exchange(&client, code_request(code)).await.unwrap();
        assert_eq!(response.token_type, "Bearer");
        assert_eq!(response.scope, scopes("openid message.read"));
        assert!(response.refresh_token.is_some());

        let claims = f
            .validator
            .validate_access_token(&response.access_token, &f.config.audience)
            .unwrap();
        assert_eq!(claims.sub, "user1");
        assert_eq!(claims.client_id, "messaging-client");

        let id = f
            .validator
            .validate_id_token(response.id_token.as_deref().unwrap(), "messaging-client")
            .unwrap();
        assert_eq!(id.nonce.as_deref(), Some("n-0S6_WzA2Mj"));
        assert_eq!(id.azp, "messaging-client");
    }

    #[tokio::test]
    async fn test_no_id_token_without_openid() {
        let f = fixture(Config::for_testing());
        let client = messaging_client();
        let code = code_for(&f, &client, "message.read").await;
        let response = f.issuer.exchange(&client, code_request(code)).await.unwrap();
        assert!(response.id_token.is_none());
    }

    #[tokio::test]
    async fn test_code_replay_revokes_family() {
        let f = fixture(Config::for_testing());
        let client = messaging_client();
        let code = code_for(&f, &client, "message.read").await;

        let first = f.issuer.exchange(&client, code_request(code.clone())).await.unwrap();
        let err = f.issuer.exchange(&client, code_request(code)).await.unwrap_err();
        assert_eq!(err.code(), "invalid_grant");

        let refresh = TokenRequest::RefreshToken {
            refresh_token: first.refresh_token.unwrap(),
            scope: None,
        };
        assert_eq!(f.issuer.exchange(&client, refresh).await.unwrap_err().code(), "invalid_grant");
        assert!(f.validator.authenticate_bearer(&first.access_token).await.is_err());
    }

    #[tokio::test]
    async fn test_code_replay_by_other_client_uses_owner_lifetimes() {
        let f = fixture(Config::for_testing());
        let owner = RegisteredClient::builder("messaging-client")
            .client_secret("secret")
            .grant_type(GrantType::AuthorizationCode)
            .grant_type(GrantType::RefreshToken)
            .redirect_uri("http://127.0.0.1:8080/authorized")
            .scope("message.read")
            .token_settings(TokenSettings {
                refresh_token_ttl: Some(Duration::from_secs(7200)),
                ..TokenSettings::default()
            })
            .build()
            .unwrap();
        f.clients.save(owner.clone()).await.unwrap();
        let other = RegisteredClient::builder("other-client")
            .client_secret("secret")
            .grant_type(GrantType::AuthorizationCode)
            .redirect_uri("http://127.0.0.1:9090/cb")
            .build()
            .unwrap();

        let code = code_for(&f, &owner, "message.read").await;
        let first = f.issuer.exchange(&owner, code_request(code.clone())).await.unwrap();
        let err = f.issuer.exchange(&other, code_request(code)).await.unwrap_err();
        assert_eq!(err.code(), "invalid_grant");

        let gid = f
            .validator
            .validate_access_token(&first.access_token, &f.config.audience)
            .unwrap()
            .gid;
        // Past every server default, but inside the owner's refresh lifetime.
        let later = Utc::now() + chrono::TimeDelta::seconds(3601);
        f.refresh_tokens.purge_expired(later).await.unwrap();
        assert!(f.refresh_tokens.is_family_revoked(&gid).await.unwrap());
    }

    #[tokio::test]
    async fn test_client_credentials() {
        let f = fixture(Config::for_testing());
        let client = messaging_client();

        let all = f
            .issuer
            .exchange(&client, TokenRequest::ClientCredentials { scope: None })
            .await
            .unwrap();
        assert_eq!(all.scope, client.scopes);
        assert!(all.refresh_token.is_none());
        assert!(all.id_token.is_none());

        let request = TokenRequest::ClientCredentials {
            scope: Some(scopes("message.read")),
        };
        let narrowed = f.issuer.exchange(&client, request).await.unwrap();
        let claims = f
            .validator
            .validate_access_token(&narrowed.access_token, &f.config.audience)
            .unwrap();
        assert_eq!(claims.sub, "messaging-client");
        assert_eq!(claims.scope, scopes("message.read"));

        let err = f
            .issuer
            .exchange(&client, TokenRequest::ClientCredentials { scope: Some(scopes("admin")) })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_scope");
    }

    #[tokio::test]
    async fn test_grant_not_registered_for_client() {
        let f = fixture(Config::for_testing());
        let client = RegisteredClient::builder("cc-only")
            .client_secret("s")
            .grant_type(GrantType::ClientCredentials)
            .build()
            .unwrap();
        let err = f.issuer.exchange(&client, code_request("x".into())).await.unwrap_err();
        assert_eq!(err.code(), "unauthorized_client");
    }

    #[tokio::test]
    async fn test_password_grant_disabled_by_default() {
        let f = fixture(Config::for_testing());
        let request = TokenRequest::Password {
            username: "user".into(),
            password: "password".into(),
            scope: None,
        };
        let err = f.issuer.exchange(&messaging_client(), request).await.unwrap_err();
        assert_eq!(err.code(), "unsupported_grant_type");
        assert_eq!(err.description(), "grant_type password is deprecated and not enabled");
    }

    #[tokio::test]
    async fn test_password_grant_opt_in() {
        let f = fixture(Config::for_testing().with_legacy_grants());
        let owners = StaticResourceOwners::new().with_user("user", "password").unwrap();
        let issuer = TokenIssuer::new(
            Arc::clone(&f.config),
            Arc::clone(&f.keys),
            Arc::clone(&f.clients),
            f.codes.clone(),
            Arc::clone(&f.refresh_tokens),
        )
        .with_resource_owners(Arc::new(owners));
        let client = RegisteredClient::builder("legacy")
            .client_secret("s")
            .grant_type(GrantType::Password)
            .scope("message.read")
            .build()
            .unwrap();

        let ok = TokenRequest::Password {
            username: "user".into(),
            password: "password".into(),
            scope: None,
        };
        let response = issuer.exchange(&client, ok).await.unwrap();
        let claims = f
            .validator
            .validate_access_token(&response.access_token, &f.config.audience)
            .unwrap();
        assert_eq!(claims.sub, "user");

        let bad = TokenRequest::Password {
            username: "user".into(),
            password: "nope".into(),
            scope: None,
        };
        assert_eq!(issuer.exchange(&client, bad).await.unwrap_err().code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_refresh_rotation_and_replay() {
        let f = fixture(Config::for_testing());
        let client = messaging_client();
        let code = code_for(&f, &client, "message.read message.write").await;
        let first = f.issuer.exchange(&client, code_request(code)).await.unwrap();
        let old = first.refresh_token.unwrap();

        let refreshed = f
            .issuer
            .exchange(
                &client,
                TokenRequest::RefreshToken {
                    refresh_token: old.clone(),
                    scope: Some(scopes("message.read")),
                },
            )
            .await
            .unwrap();
        assert_eq!(refreshed.scope, scopes("message.read"));
        let new = refreshed.refresh_token.unwrap();
        assert_ne!(new, old);

        // The rotated token keeps the original grant's scope.
        let record = f.refresh_tokens.find(&store::digest(&new)).await.unwrap().unwrap();
        assert_eq!(record.scopes, scopes("message.read message.write"));

        // Replaying the old token burns the family, including the new token.
        let replay = TokenRequest::RefreshToken {
            refresh_token: old,
            scope: None,
        };
        assert_eq!(f.issuer.exchange(&client, replay).await.unwrap_err().code(), "invalid_grant");
        let after = TokenRequest::RefreshToken {
            refresh_token: new,
            scope: None,
        };
        assert_eq!(f.issuer.exchange(&client, after).await.unwrap_err().code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_refresh_scope_escalation() {
        let f = fixture(Config::for_testing());
        let client = messaging_client();
        let code = code_for(&f, &client, "message.read").await;
        let first = f.issuer.exchange(&client, code_request(code)).await.unwrap();

        let err = f
            .issuer
            .exchange(
                &client,
                TokenRequest::RefreshToken {
                    refresh_token: first.refresh_token.unwrap(),
                    scope: Some(scopes("message.read message.write")),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_scope");
    }

    #[tokio::test]
    async fn test_refresh_by_other_client_does_not_burn_token() {
        let f = fixture(Config::for_testing());
        let client = messaging_client();
        let code = code_for(&f, &client, "message.read").await;
        let issued = f.issuer.exchange(&client, code_request(code)).await.unwrap();
        let token = issued.refresh_token.unwrap();

        let other = RegisteredClient::builder("other")
            .client_secret("s")
            .grant_type(GrantType::RefreshToken)
            .scope("message.read")
            .build()
            .unwrap();
        let stolen = TokenRequest::RefreshToken {
            refresh_token: token.clone(),
            scope: None,
        };
        assert_eq!(f.issuer.exchange(&other, stolen).await.unwrap_err().code(), "invalid_grant");

        let own = TokenRequest::RefreshToken {
            refresh_token: token,
            scope: None,
        };
        assert!(f.issuer.exchange(&client, own).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_reuse_setting() {
        let f = fixture(Config::for_testing());
        let mut client = messaging_client();
        client.token_settings.reuse_refresh_tokens = true;
        let code = code_for(&f, &client, "message.read").await;
        let issued = f.issuer.exchange(&client, code_request(code)).await.unwrap();
        let token = issued.refresh_token.unwrap();

        for _ in 0..2 {
            let again = f
                .issuer
                .exchange(
                    &client,
                    TokenRequest::RefreshToken {
                        refresh_token: token.clone(),
                        scope: None,
                    },
                )
                .await
                .unwrap();
            assert_eq!(again.refresh_token.as_deref(), Some(token.as_str()));
        }
    }

    #[test]
    fn test_from_params() {
        let params = Params::parse("grant_type=client_credentials&scope=message.read");
        assert_eq!(
            TokenRequest::from_params(&params).unwrap(),
            TokenRequest::ClientCredentials { scope: Some(scopes("message.read")) }
        );

        let err = TokenRequest::from_params(&Params::parse("grant_type=urn:custom")).unwrap_err();
        assert_eq!(err.code(), "unsupported_grant_type");

        let missing_code = Params::parse("grant_type=authorization_code");
        let err = TokenRequest::from_params(&missing_code).unwrap_err();
        assert_eq!(err.code(), "invalid_request");

        let err = TokenRequest::from_params(&Params::parse("scope=a")).unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn test_response_serialization() {
        let response = TokenResponse {
            access_token: "at".into(),
            token_type: "Bearer",
            expires_in: 300,
            refresh_token: None,
            id_token: None,
            scope: scopes("b a"),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["scope"], "a b");
        assert!(json.get("refresh_token").is_none());
    }
}
