//! Token endpoint.

use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
};

use super::{authenticate_client, no_store};
use crate::params::Params;
use crate::server::transport::HttpState;
use crate::tokens::TokenRequest;

/// `POST /token`
///
/// The body is read raw so repeated parameters can be rejected.
pub async fn handle_token(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let params = Params::parse(&body);

    let client = match authenticate_client(&state, &headers, &params).await {
        Ok(client) => client,
        Err(failure) => return failure.into_response(),
    };

    let request = match TokenRequest::from_params(&params) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(
                client_id = %client.client_id,
                error = e.code(),
                "Malformed token request"
            );
            return e.into_response();
        }
    };

    match state.issuer.exchange(&client, request).await {
        Ok(tokens) => no_store(&tokens),
        Err(e) => {
            tracing::info!(
                client_id = %client.client_id,
                error = e.code(),
                "Token request rejected"
            );
            e.into_response()
        }
    }
}
