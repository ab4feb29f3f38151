//! OAuth 2.1 / OpenID Connect endpoint handlers.
//!
//! ## Supported Standards
//! - RFC 6749: Authorization Code, Client Credentials and Refresh Token grants
//! - RFC 7636: PKCE (S256, plain)
//! - RFC 7662: Token Introspection
//! - RFC 7009: Token Revocation
//! - RFC 7591: Dynamic Client Registration
//! - RFC 8414 / OpenID Connect Discovery: metadata
//! - RFC 7517: JWK Set

pub mod authorize;
pub mod discovery;
pub mod introspection;
pub mod registration;
pub mod token;

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Basic};
use serde::Serialize;

use crate::clients::{ClientCredentials, RegisteredClient};
use crate::error::{OAuthError, OAuthResult};
use crate::params::Params;
use crate::server::transport::HttpState;
use crate::store;

const BASIC_CHALLENGE: &str = r#"Basic realm="oauth""#;

/// Failed client authentication at a token-style endpoint.
#[derive(Debug)]
pub struct ClientAuthFailure {
    pub error: OAuthError,
    /// Whether the client tried HTTP Basic, which earns a challenge header.
    pub basic: bool,
}

impl IntoResponse for ClientAuthFailure {
    fn into_response(self) -> Response {
        let challenge = self.basic && matches!(self.error, OAuthError::InvalidClient(_));
        let mut response = self.error.into_response();
        if challenge {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(BASIC_CHALLENGE));
        }
        response
    }
}

/// Authenticate the client behind a token, introspection or revocation request.
pub async fn authenticate_client(
    state: &HttpState,
    headers: &HeaderMap,
    params: &Params,
) -> Result<RegisteredClient, ClientAuthFailure> {
    let basic = attempts_basic(headers);
    let fail = |error| ClientAuthFailure { error, basic };

    let credentials = presented_credentials(headers, params, basic).map_err(fail)?;
    let authenticated =
        store::bounded(state.config.store_timeout, state.clients.authenticate(&credentials)).await;
    authenticated.map_err(fail)
}

fn attempts_basic(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split_once(' '))
        .is_some_and(|(scheme, _)| scheme.eq_ignore_ascii_case("basic"))
}

/// Pick exactly one authentication method from the header and body.
fn presented_credentials(
    headers: &HeaderMap,
    params: &Params,
    basic: bool,
) -> OAuthResult<ClientCredentials> {
    let body_id = params.get("client_id")?;
    let body_secret = params.get("client_secret")?;

    if basic {
        let Some(auth) = headers.typed_get::<Authorization<Basic>>() else {
            tracing::warn!("Malformed Basic authorization header");
            return Err(OAuthError::invalid_client());
        };
        if body_secret.is_some() {
            return Err(OAuthError::invalid_request(
                "client used more than one authentication method",
            ));
        }
        if body_id.is_some_and(|id| id != auth.username()) {
            return Err(OAuthError::invalid_request(
                "client_id does not match the authenticated client",
            ));
        }
        return Ok(ClientCredentials::Basic {
            client_id: auth.username().to_owned(),
            client_secret: auth.password().to_owned(),
        });
    }

    match (body_id, body_secret) {
        (Some(client_id), Some(client_secret)) => Ok(ClientCredentials::Post {
            client_id: client_id.to_owned(),
            client_secret: client_secret.to_owned(),
        }),
        (Some(client_id), None) => Ok(ClientCredentials::Public {
            client_id: client_id.to_owned(),
        }),
        _ => Err(OAuthError::invalid_client()),
    }
}

/// JSON response with the cache headers RFC 6749 §5.1 requires for credentials.
pub fn no_store<T: Serialize>(body: &T) -> Response {
    let mut response = Json(body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic_headers(id: &str, secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.typed_insert(Authorization::basic(id, secret));
        headers
    }

    #[test]
    fn test_basic_credentials() {
        let headers = basic_headers("messaging-client", "secret");
        let creds =
            presented_credentials(&headers, &Params::default(), attempts_basic(&headers)).unwrap();
        assert_eq!(
            creds,
            ClientCredentials::Basic {
                client_id: "messaging-client".into(),
                client_secret: "secret".into()
            }
        );
    }

    #[test]
    fn test_post_and_public_credentials() {
        let headers = HeaderMap::new();
        let post = Params::parse("client_id=c1&client_secret=s");
        assert!(matches!(
            presented_credentials(&headers, &post, false).unwrap(),
            ClientCredentials::Post { .. }
        ));

        let public = Params::parse("client_id=c1");
        assert_eq!(
            presented_credentials(&headers, &public, false).unwrap(),
            ClientCredentials::Public { client_id: "c1".into() }
        );

        let err = presented_credentials(&headers, &Params::default(), false).unwrap_err();
        assert_eq!(err.code(), "invalid_client");
    }

    #[test]
    fn test_two_methods_rejected() {
        let headers = basic_headers("c1", "s");
        let params = Params::parse("client_secret=s");
        let err = presented_credentials(&headers, &params, true).unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn test_basic_challenge_header() {
        let response = ClientAuthFailure {
            error: OAuthError::invalid_client(),
            basic: true,
        }
        .into_response();
        assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], BASIC_CHALLENGE);

        let response = ClientAuthFailure {
            error: OAuthError::invalid_client(),
            basic: false,
        }
        .into_response();
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
    }
}
