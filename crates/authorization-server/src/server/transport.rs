//! Router, shared state and background maintenance.

use std::fmt;
use std::sync::Arc;

use axum::{
    Json, Router, middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::{oauth, resource};
use crate::authorize::AuthorizationRequestValidator;
use crate::clients::{ClientRepository, InMemoryClientRepository, RegisteredClient};
use crate::codes::{AuthorizationCodes, InMemoryCodeStore};
use crate::config::Config;
use crate::consent::{ConsentStore, InMemoryConsentStore};
use crate::keys::KeyManager;
use crate::subject::{HeaderSubjectResolver, ResourceOwnerVerifier, SubjectResolver};
use crate::tokens::{InMemoryRefreshTokenStore, RefreshTokenStore, TokenIssuer, TokenValidator};

/// Shared state for HTTP handlers.
pub struct HttpState {
    pub config: Arc<Config>,
    pub clients: Arc<dyn ClientRepository>,
    pub keys: Arc<KeyManager>,
    pub codes: AuthorizationCodes,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    pub consents: Arc<dyn ConsentStore>,
    pub issuer: TokenIssuer,
    pub validator: TokenValidator,
    pub subjects: Arc<dyn SubjectResolver>,
    pub authorize: AuthorizationRequestValidator,
}

impl HttpState {
    /// Wire every component against in-memory stores.
    #[must_use]
    pub fn in_memory(
        config: Config,
        keys: KeyManager,
        clients: impl IntoIterator<Item = RegisteredClient>,
    ) -> Self {
        let config = Arc::new(config);
        let keys = Arc::new(keys);
        let clients: Arc<dyn ClientRepository> =
            Arc::new(InMemoryClientRepository::with_clients(clients));
        let codes = AuthorizationCodes::new(
            Arc::new(InMemoryCodeStore::new()),
            config.auth_code_ttl,
            config.store_timeout,
        );
        let refresh_tokens: Arc<dyn RefreshTokenStore> = Arc::new(InMemoryRefreshTokenStore::new());
        let issuer = TokenIssuer::new(
            Arc::clone(&config),
            Arc::clone(&keys),
            Arc::clone(&clients),
            codes.clone(),
            Arc::clone(&refresh_tokens),
        );
        let validator = TokenValidator::new(
            Arc::clone(&config),
            Arc::clone(&keys),
            Arc::clone(&refresh_tokens),
        );

        Self {
            subjects: Arc::new(HeaderSubjectResolver::new(config.subject_header.clone())),
            authorize: AuthorizationRequestValidator::new(&config),
            consents: Arc::new(InMemoryConsentStore::new()),
            config,
            clients,
            keys,
            codes,
            refresh_tokens,
            issuer,
            validator,
        }
    }

    /// Enable the `password` grant against `owners`.
    #[must_use]
    pub fn with_resource_owners(mut self, owners: Arc<dyn ResourceOwnerVerifier>) -> Self {
        self.issuer = self.issuer.with_resource_owners(owners);
        self
    }

    /// Replace how the end-user behind an authorization request is found.
    #[must_use]
    pub fn with_subject_resolver(mut self, subjects: Arc<dyn SubjectResolver>) -> Self {
        self.subjects = subjects;
        self
    }

    /// Start background cleanup of expired codes, refresh tokens and retired keys.
    pub fn start_cleanup_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.cleanup_interval);
            loop {
                interval.tick().await;
                self.cleanup_expired().await;
            }
        });
    }

    pub async fn cleanup_expired(&self) {
        match self.codes.purge_expired().await {
            Ok(0) => {}
            Ok(count) => tracing::debug!(count, "Purged expired authorization codes"),
            Err(e) => tracing::warn!(error = %e, "Authorization code cleanup failed"),
        }

        let purge = self.refresh_tokens.purge_expired(chrono::Utc::now());
        match crate::store::bounded(self.config.store_timeout, purge).await {
            Ok(0) => {}
            Ok(count) => tracing::debug!(count, "Purged expired refresh tokens"),
            Err(e) => tracing::warn!(error = %e, "Refresh token cleanup failed"),
        }

        self.keys.prune_retired(self.config.key_retention);
    }
}

impl fmt::Debug for HttpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpState")
            .field("issuer", &self.config.issuer)
            .field("keys", &self.keys)
            .finish()
    }
}

/// Create the HTTP router for the authorization server.
pub fn create_router(state: Arc<HttpState>) -> Router {
    let protected = Router::new()
        .route("/userinfo", get(resource::handle_userinfo).post(resource::handle_userinfo))
        .route_layer(middleware::from_fn_with_state(Arc::clone(&state), resource::require_bearer));

    Router::new()
        .route("/health", get(health_check))
        // Authorization endpoint
        .route("/authorize", get(oauth::authorize::handle_authorize))
        .route("/authorize/consent", post(oauth::authorize::handle_consent))
        // Token-style endpoints, client-authenticated
        .route("/token", post(oauth::token::handle_token))
        .route("/introspect", post(oauth::introspection::handle_introspect))
        .route("/revoke", post(oauth::introspection::handle_revoke))
        .route("/register", post(oauth::registration::handle_register))
        // Key material and metadata
        .route("/jwks", get(oauth::discovery::handle_jwks))
        .route("/.well-known/jwks.json", get(oauth::discovery::handle_jwks))
        .route(
            "/.well-known/oauth-authorization-server",
            get(oauth::discovery::handle_auth_server_metadata),
        )
        .route(
            "/.well-known/openid-configuration",
            get(oauth::discovery::handle_openid_configuration),
        )
        .merge(protected)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "authorization-server",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
