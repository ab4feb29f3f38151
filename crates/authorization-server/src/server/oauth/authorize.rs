//! Authorization endpoint and consent decisions.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{RawQuery, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};

use super::no_store;
use crate::authorize::{AuthorizationRequest, AuthorizeError, ResponseType, ValidatedRequest, found};
use crate::clients::RegisteredClient;
use crate::consent;
use crate::error::OAuthError;
use crate::params::Params;
use crate::scope::{OPENID, ScopeSet};
use crate::server::transport::HttpState;
use crate::store;

/// Parameters the consent form adds to the original authorization request.
const CONSENT_PARAMS: [&str; 2] = ["consent", "approved_scope"];

/// `GET /authorize`
///
/// Redirects with a code (or, when enabled, an implicit token) once the
/// end-user is known and has consented; otherwise answers with a JSON consent
/// prompt for the external UI.
pub async fn handle_authorize(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    let params = Params::parse(query.as_deref().unwrap_or_default());
    match authorize(&state, &headers, &params).await {
        Ok(response) => response,
        Err(e) => {
            tracing::info!(error = e.code(), "Authorization request rejected");
            e.into_response()
        }
    }
}

/// `POST /authorize/consent`
///
/// The body repeats the original authorization parameters plus
/// `consent=approve|deny` and, on approval, `approved_scope`.
pub async fn handle_consent(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let params = Params::parse(&body);
    match decide(&state, &headers, &params).await {
        Ok(response) => response,
        Err(e) => {
            tracing::info!(error = e.code(), "Consent decision rejected");
            e.into_response()
        }
    }
}

async fn authorize(
    state: &HttpState,
    headers: &HeaderMap,
    params: &Params,
) -> Result<Response, AuthorizeError> {
    let validated = state.authorize.validate(state.clients.as_ref(), params).await?;
    let ValidatedRequest { request, client } = validated;

    let Some(subject) = state.subjects.resolve(headers) else {
        return Err(request.error_redirect(OAuthError::LoginRequired(
            "the end-user is not authenticated".into(),
        )));
    };

    let granted = store::bounded(
        state.config.store_timeout,
        state.consents.granted(&client.client_id, &subject),
    )
    .await
    .map_err(|e| request.error_redirect(e.into()))?;

    if consent::requires_consent(&client, &granted, &request.scopes) {
        if request.prompt_none {
            return Err(request.error_redirect(OAuthError::ConsentRequired(
                "the end-user has not consented to the requested scope".into(),
            )));
        }
        tracing::debug!(client_id = %client.client_id, "Consent required");
        return Ok(consent_prompt(state, params, &request, &client, &subject, &granted));
    }

    let scopes = request.scopes.clone();
    complete(state, &request, &client, &subject, scopes).await
}

async fn decide(
    state: &HttpState,
    headers: &HeaderMap,
    params: &Params,
) -> Result<Response, AuthorizeError> {
    let validated = state.authorize.validate(state.clients.as_ref(), params).await?;
    let ValidatedRequest { request, client } = validated;

    let Some(subject) = state.subjects.resolve(headers) else {
        return Err(request.error_redirect(OAuthError::LoginRequired(
            "the end-user is not authenticated".into(),
        )));
    };

    let decision = params.get("consent").map_err(|e| request.error_redirect(e))?;
    if decision != Some("approve") {
        tracing::info!(client_id = %client.client_id, "End-user denied consent");
        return Err(request.error_redirect(OAuthError::AccessDenied(
            "the end-user denied the request".into(),
        )));
    }

    let approved = params
        .get("approved_scope")
        .and_then(|raw| raw.map(ScopeSet::parse).transpose())
        .map_err(|e| request.error_redirect(e))?
        .unwrap_or_default();
    if !approved.is_subset(&request.scopes) {
        return Err(request.error_redirect(OAuthError::invalid_scope(
            "approved scope exceeds the requested scope",
        )));
    }

    let timeout = state.config.store_timeout;
    let previously = store::bounded(timeout, state.consents.granted(&client.client_id, &subject))
        .await
        .map_err(|e| request.error_redirect(e.into()))?;

    let mut granted = request.scopes.intersection(&approved.union(&previously));
    if request.is_openid() {
        granted = granted.union(&ScopeSet::from_iter([OPENID.to_owned()]));
    }
    if granted.is_empty() {
        return Err(request.error_redirect(OAuthError::AccessDenied(
            "no scope was approved".into(),
        )));
    }

    store::bounded(
        timeout,
        state.consents.grant(&client.client_id, &subject, &approved.without(OPENID)),
    )
    .await
    .map_err(|e| request.error_redirect(e.into()))?;
    tracing::info!(client_id = %client.client_id, scope = %granted, "End-user approved consent");

    complete(state, &request, &client, &subject, granted).await
}

/// Finish an approved request with a redirect carrying the credential.
async fn complete(
    state: &HttpState,
    request: &AuthorizationRequest,
    client: &RegisteredClient,
    subject: &str,
    granted: ScopeSet,
) -> Result<Response, AuthorizeError> {
    let location = match request.response_type {
        ResponseType::Code => {
            let code = state
                .codes
                .issue(request, subject, granted)
                .await
                .map_err(|e| request.error_redirect(e.into()))?;
            tracing::info!(
                client_id = %client.client_id,
                scope = %code.scopes,
                "Issued authorization code"
            );
            request.success_location(&[("code", code.value.as_str())])
        }
        ResponseType::Token => {
            let tokens = state
                .issuer
                .implicit(client, request, subject, granted)
                .map_err(|e| request.error_redirect(e))?;
            let expires_in = tokens.expires_in.to_string();
            let scope = tokens.scope.to_string();
            tracing::info!(
                client_id = %client.client_id,
                scope = %scope,
                "Issued implicit access token"
            );
            request.success_location(&[
                ("access_token", tokens.access_token.as_str()),
                ("token_type", tokens.token_type),
                ("expires_in", expires_in.as_str()),
                ("scope", scope.as_str()),
            ])
        }
    }
    .map_err(AuthorizeError::direct)?;

    Ok(found(&location))
}

/// What the external consent UI needs to render and post back.
fn consent_prompt(
    state: &HttpState,
    params: &Params,
    request: &AuthorizationRequest,
    client: &RegisteredClient,
    subject: &str,
    granted: &ScopeSet,
) -> Response {
    let parameters: BTreeMap<&str, &str> =
        params.iter().filter(|(k, _)| !CONSENT_PARAMS.contains(k)).collect();
    let to_approve = request.scopes.without(OPENID).difference(granted);
    let previously = request.scopes.intersection(granted);

    no_store(&serde_json::json!({
        "consent_endpoint": format!("{}/authorize/consent", state.config.issuer),
        "client_id": client.client_id,
        "client_name": client.client_name.as_deref().unwrap_or(&client.client_id),
        "subject": subject,
        "scopes_requested": request.scopes.iter().collect::<Vec<_>>(),
        "scopes_to_approve": to_approve.iter().collect::<Vec<_>>(),
        "scopes_previously_approved": previously.iter().collect::<Vec<_>>(),
        "parameters": parameters
    }))
}
