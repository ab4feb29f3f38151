//! RFC 7662 introspection and RFC 7009 revocation endpoints.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use super::{authenticate_client, no_store};
use crate::params::Params;
use crate::server::transport::HttpState;

/// `POST /introspect`
pub async fn handle_introspect(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let params = Params::parse(&body);
    let client = match authenticate_client(&state, &headers, &params).await {
        Ok(client) => client,
        Err(failure) => return failure.into_response(),
    };
    let token = match params.require("token") {
        Ok(token) => token,
        Err(e) => return e.into_response(),
    };

    match state.validator.introspect(token, &client).await {
        Ok(response) => {
            tracing::debug!(
                client_id = %client.client_id,
                active = response.active,
                "Introspected token"
            );
            no_store(&response)
        }
        Err(e) => e.into_response(),
    }
}

/// `POST /revoke`
///
/// Answers 200 for unknown tokens as well (RFC 7009 §2.2).
pub async fn handle_revoke(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let params = Params::parse(&body);
    let client = match authenticate_client(&state, &headers, &params).await {
        Ok(client) => client,
        Err(failure) => return failure.into_response(),
    };
    let token = match params.require("token") {
        Ok(token) => token,
        Err(e) => return e.into_response(),
    };

    match state.validator.revoke(token, &client).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}
