//! JWK set and server metadata.

use std::sync::Arc;

use axum::{Json, extract::State, response::IntoResponse};

use crate::clients::GrantType;
use crate::config::Config;
use crate::keys::ALGORITHM;
use crate::server::transport::HttpState;

// ─── RFC 7517: JWK Set ───────────────────────────────────────────────────────

/// `GET /jwks`, `GET /.well-known/jwks.json`
///
/// The active key first, then retired keys still inside their retention window.
pub async fn handle_jwks(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(state.keys.jwks())
}

// ─── RFC 8414: Authorization Server Metadata ─────────────────────────────────

/// `GET /.well-known/oauth-authorization-server`
pub async fn handle_auth_server_metadata(
    State(state): State<Arc<HttpState>>,
) -> impl IntoResponse {
    Json(metadata(&state.config))
}

/// `GET /.well-known/openid-configuration`
pub async fn handle_openid_configuration(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let mut document = metadata(&state.config);
    let base = &state.config.issuer;
    if let Some(fields) = document.as_object_mut() {
        fields.insert("userinfo_endpoint".into(), format!("{base}/userinfo").into());
        fields.insert("subject_types_supported".into(), serde_json::json!(["public"]));
        fields.insert(
            "id_token_signing_alg_values_supported".into(),
            serde_json::json!([ALGORITHM]),
        );
        fields.insert(
            "claims_supported".into(),
            serde_json::json!(["iss", "sub", "aud", "exp", "iat", "auth_time", "nonce", "azp"]),
        );
    }
    Json(document)
}

fn metadata(config: &Config) -> serde_json::Value {
    let base = &config.issuer;

    let mut response_types = vec!["code"];
    if config.grant_enabled(GrantType::Implicit) {
        response_types.push("token");
    }
    let grant_types: Vec<&str> = config
        .enabled_grants
        .iter()
        .filter(|g| **g != GrantType::Implicit)
        .map(|g| g.as_str())
        .collect();
    let mut challenge_methods = vec!["S256"];
    if config.allow_plain_pkce {
        challenge_methods.push("plain");
    }
    let auth_methods = ["client_secret_basic", "client_secret_post", "none"];

    let mut document = serde_json::json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/authorize"),
        "token_endpoint": format!("{base}/token"),
        "jwks_uri": format!("{base}/jwks"),
        "introspection_endpoint": format!("{base}/introspect"),
        "revocation_endpoint": format!("{base}/revoke"),
        "scopes_supported": config.scopes_supported.iter().collect::<Vec<_>>(),
        "response_types_supported": response_types,
        "response_modes_supported": ["query", "fragment"],
        "grant_types_supported": grant_types,
        "token_endpoint_auth_methods_supported": auth_methods,
        "introspection_endpoint_auth_methods_supported": auth_methods,
        "revocation_endpoint_auth_methods_supported": auth_methods,
        "code_challenge_methods_supported": challenge_methods
    });
    if config.allow_dynamic_registration {
        if let Some(fields) = document.as_object_mut() {
            fields.insert("registration_endpoint".into(), format!("{base}/register").into());
        }
    }
    document
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_defaults() {
        let doc = metadata(&Config::for_testing());
        assert_eq!(doc["issuer"], "https://auth.test");
        assert_eq!(doc["token_endpoint"], "https://auth.test/token");
        assert_eq!(doc["response_types_supported"], serde_json::json!(["code"]));
        assert!(doc.get("registration_endpoint").is_none());

        let grants = doc["grant_types_supported"].as_array().unwrap();
        assert!(!grants.contains(&serde_json::json!("password")));
    }

    #[test]
    fn test_metadata_legacy_grants() {
        let doc = metadata(&Config::for_testing().with_legacy_grants());
        assert_eq!(doc["response_types_supported"], serde_json::json!(["code", "token"]));
        let grants = doc["grant_types_supported"].as_array().unwrap();
        assert!(grants.contains(&serde_json::json!("password")));
        assert!(!grants.contains(&serde_json::json!("implicit")));
    }
}
