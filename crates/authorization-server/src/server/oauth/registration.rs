//! RFC 7591 Dynamic Client Registration.
//!
//! Closed unless `Config::allow_dynamic_registration` is set. A confidential
//! client receives its secret exactly once, in the registration response.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::clients::{
    ClientAuthMethod, ClientError, GrantType, RegisteredClient, RegisteredClientBuilder, secret,
};
use crate::config::Config;
use crate::scope::ScopeSet;
use crate::server::transport::HttpState;
use crate::store;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub client_name: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(default)]
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: Option<String>,
    pub scope: Option<String>,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub client_id_issued_at: i64,
    /// Zero: the secret does not expire.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret_expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<&'static str>,
    pub response_types: Vec<&'static str>,
    pub token_endpoint_auth_method: &'static str,
    #[serde(skip_serializing_if = "ScopeSet::is_empty")]
    pub scope: ScopeSet,
}

/// Registration failures, with the RFC 7591 §3.2.2 error codes.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("dynamic client registration is disabled")]
    Disabled,

    #[error("{0}")]
    InvalidRedirectUri(String),

    #[error("{0}")]
    InvalidMetadata(String),

    #[error("registration failed")]
    Server,
}

impl RegistrationError {
    const fn code(&self) -> &'static str {
        match self {
            Self::Disabled => "access_denied",
            Self::InvalidRedirectUri(_) => "invalid_redirect_uri",
            Self::InvalidMetadata(_) => "invalid_client_metadata",
            Self::Server => "server_error",
        }
    }

    const fn status(&self) -> StatusCode {
        match self {
            Self::Disabled => StatusCode::FORBIDDEN,
            Self::Server => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<ClientError> for RegistrationError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::InvalidRedirectUri(msg) => Self::InvalidRedirectUri(msg),
            ClientError::InvalidMetadata(msg) => Self::InvalidMetadata(msg),
            ClientError::Hash(msg) => {
                tracing::error!(error = %msg, "Hashing a registered client secret failed");
                Self::Server
            }
        }
    }
}

impl IntoResponse for RegistrationError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(serde_json::json!({
                "error": self.code(),
                "error_description": self.to_string()
            })),
        )
            .into_response()
    }
}

/// `POST /register`
pub async fn handle_register(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<RegisterRequest>,
) -> Response {
    match register(&state, req).await {
        Ok(response) => {
            let mut response = (StatusCode::CREATED, Json(response)).into_response();
            response
                .headers_mut()
                .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            response
        }
        Err(e) => {
            tracing::warn!(error = %e, "Client registration rejected");
            e.into_response()
        }
    }
}

async fn register(
    state: &HttpState,
    req: RegisterRequest,
) -> Result<RegisterResponse, RegistrationError> {
    if !state.config.allow_dynamic_registration {
        return Err(RegistrationError::Disabled);
    }

    let metadata = RegistrationMetadata::from_request(req, &state.config)?;
    let client_id = uuid::Uuid::new_v4().simple().to_string();
    let plain_secret = (metadata.method != ClientAuthMethod::None).then(secret::generate_secret);

    let builder = metadata.builder(&client_id, plain_secret.clone());
    // Argon2 hashing is CPU-bound.
    let client = tokio::task::spawn_blocking(move || builder.build())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Registration task failed");
            RegistrationError::Server
        })??;

    let response = RegisterResponse {
        client_id: client.client_id.clone(),
        client_secret_expires_at: plain_secret.as_ref().map(|_| 0),
        client_secret: plain_secret,
        client_id_issued_at: client.client_id_issued_at.timestamp(),
        client_name: client.client_name.clone(),
        redirect_uris: client.redirect_uris.clone(),
        grant_types: client.grant_types.iter().map(|g| g.as_str()).collect(),
        response_types: metadata.response_types,
        token_endpoint_auth_method: metadata.method.as_str(),
        scope: client.scopes.clone(),
    };

    store::bounded(state.config.store_timeout, state.clients.save(client))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Storing a registered client failed");
            RegistrationError::Server
        })?;
    tracing::info!(
        client_id = %response.client_id,
        method = %metadata.method,
        "Registered OAuth client"
    );
    Ok(response)
}

/// Checked registration metadata, before a client id is assigned.
#[derive(Debug)]
struct RegistrationMetadata {
    client_name: Option<String>,
    redirect_uris: Vec<String>,
    grants: Vec<GrantType>,
    response_types: Vec<&'static str>,
    method: ClientAuthMethod,
    scopes: ScopeSet,
}

impl RegistrationMetadata {
    fn from_request(req: RegisterRequest, config: &Config) -> Result<Self, RegistrationError> {
        let method = req
            .token_endpoint_auth_method
            .as_deref()
            .map_or(Ok(ClientAuthMethod::ClientSecretBasic), ClientAuthMethod::from_str)?;

        let grants = if req.grant_types.is_empty() {
            vec![GrantType::AuthorizationCode]
        } else {
            req.grant_types
                .iter()
                .map(|g| g.parse::<GrantType>())
                .collect::<Result<Vec<_>, _>>()?
        };
        if let Some(disabled) = grants.iter().find(|g| !config.grant_enabled(**g)) {
            return Err(RegistrationError::InvalidMetadata(format!(
                "grant type {disabled} is not enabled on this server"
            )));
        }

        let mut response_types = Vec::new();
        for response_type in &req.response_types {
            let (name, grant) = match response_type.as_str() {
                "code" => ("code", GrantType::AuthorizationCode),
                "token" => ("token", GrantType::Implicit),
                other => {
                    return Err(RegistrationError::InvalidMetadata(format!(
                        "unsupported response type: {other}"
                    )));
                }
            };
            if !grants.contains(&grant) {
                return Err(RegistrationError::InvalidMetadata(format!(
                    "response type {name} requires grant type {grant}"
                )));
            }
            response_types.push(name);
        }
        if response_types.is_empty() && grants.contains(&GrantType::AuthorizationCode) {
            response_types.push("code");
        }

        let scopes = match req.scope.as_deref() {
            Some(raw) => ScopeSet::parse(raw)
                .map_err(|e| RegistrationError::InvalidMetadata(e.description().to_owned()))?,
            None => ScopeSet::new(),
        };
        if !scopes.is_subset(&config.scopes_supported) {
            return Err(RegistrationError::InvalidMetadata(format!(
                "scope {} is not supported",
                scopes.difference(&config.scopes_supported)
            )));
        }

        Ok(Self {
            client_name: req.client_name,
            redirect_uris: req.redirect_uris,
            grants,
            response_types,
            method,
            scopes,
        })
    }

    fn builder(&self, client_id: &str, plain_secret: Option<String>) -> RegisteredClientBuilder {
        let mut builder = RegisteredClient::builder(client_id)
            .authentication_method(self.method)
            .scopes(&self.scopes);
        if let Some(name) = &self.client_name {
            builder = builder.client_name(name.clone());
        }
        if let Some(secret) = plain_secret {
            builder = builder.client_secret(secret);
        }
        for grant in &self.grants {
            builder = builder.grant_type(*grant);
        }
        for uri in &self.redirect_uris {
            builder = builder.redirect_uri(uri.clone());
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: serde_json::Value) -> RegisterRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_defaults() {
        let metadata = RegistrationMetadata::from_request(
            request(serde_json::json!({ "redirect_uris": ["https://app.example/cb"] })),
            &Config::for_testing(),
        )
        .unwrap();
        assert_eq!(metadata.method, ClientAuthMethod::ClientSecretBasic);
        assert_eq!(metadata.grants, vec![GrantType::AuthorizationCode]);
        assert_eq!(metadata.response_types, vec!["code"]);
        assert!(metadata.scopes.is_empty());
    }

    #[test]
    fn test_disabled_grant_rejected() {
        let err = RegistrationMetadata::from_request(
            request(serde_json::json!({ "grant_types": ["password"] })),
            &Config::for_testing(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "invalid_client_metadata");
    }

    #[test]
    fn test_inconsistent_response_type() {
        let err = RegistrationMetadata::from_request(
            request(serde_json::json!({
                "redirect_uris": ["https://app.example/cb"],
                "response_types": ["token"]
            })),
            &Config::for_testing(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "invalid_client_metadata");
    }

    #[test]
    fn test_unsupported_scope() {
        let err = RegistrationMetadata::from_request(
            request(serde_json::json!({
                "redirect_uris": ["https://app.example/cb"],
                "scope": "openid admin"
            })),
            &Config::for_testing(),
        )
        .unwrap_err();
        assert_eq!(err, RegistrationError::InvalidMetadata("scope admin is not supported".into()));
    }

    #[test]
    fn test_missing_redirect_uri_maps_to_rfc_code() {
        let metadata = RegistrationMetadata::from_request(
            request(serde_json::json!({ "token_endpoint_auth_method": "none" })),
            &Config::for_testing(),
        )
        .unwrap();
        let err: RegistrationError = metadata.builder("c", None).build().unwrap_err().into();
        assert_eq!(err.code(), "invalid_redirect_uri");
    }
}
