//! Resource-server side: the bearer guard and the OIDC userinfo endpoint.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};

use crate::error::OAuthError;
use crate::scope::OPENID;
use crate::server::transport::HttpState;
use crate::tokens::AccessTokenClaims;

/// Middleware admitting requests with a valid, unrevoked access token for
/// this server's audience. The claims go into the request extensions.
pub async fn require_bearer(
    State(state): State<Arc<HttpState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(auth) = request.headers().typed_get::<Authorization<Bearer>>() else {
        return challenge(StatusCode::UNAUTHORIZED, "Bearer");
    };

    match state.validator.authenticate_bearer(auth.token()).await {
        Ok(claims) => {
            tracing::debug!(client_id = %claims.client_id, "Bearer token accepted");
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(OAuthError::ServerError) => OAuthError::ServerError.into_response(),
        Err(e) => {
            tracing::info!(reason = e.description(), "Bearer token rejected");
            challenge(StatusCode::UNAUTHORIZED, r#"Bearer error="invalid_token""#)
        }
    }
}

/// `GET /userinfo`, `POST /userinfo`
///
/// Needs the `openid` scope.
pub async fn handle_userinfo(Extension(claims): Extension<AccessTokenClaims>) -> Response {
    if !claims.scope.contains(OPENID) {
        return challenge(
            StatusCode::FORBIDDEN,
            r#"Bearer error="insufficient_scope", scope="openid""#,
        );
    }
    Json(serde_json::json!({ "sub": claims.sub })).into_response()
}

fn challenge(status: StatusCode, value: &'static str) -> Response {
    let mut response = status.into_response();
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(value));
    response
}
