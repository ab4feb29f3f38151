//! Authorization request validation (RFC 6749 §4.1.1, RFC 7636, OIDC Core §3.1.2).
//!
//! Until the client and its redirect URI are established, every failure is a
//! direct rejection. After that, failures travel back to the client by
//! redirect, carrying `state`.

use std::time::Duration;

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use url::Url;

use crate::clients::{ClientRepository, GrantType, RegisteredClient};
use crate::config::Config;
use crate::error::{OAuthError, OAuthResult};
use crate::params::Params;
use crate::pkce::{self, CodeChallengeMethod};
use crate::scope::{OPENID, ScopeSet};
use crate::store;

/// `response_type` values this server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Code,
    /// Implicit grant. Only with legacy grants enabled.
    Token,
}

impl ResponseType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Token => "token",
        }
    }

    /// Where response parameters go on the redirect URI.
    #[must_use]
    pub const fn response_mode(self) -> ResponseMode {
        match self {
            Self::Code => ResponseMode::Query,
            Self::Token => ResponseMode::Fragment,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    Query,
    Fragment,
}

/// A validated authorization request. Lives for one authorization flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub client_id: String,
    /// The registered URI responses go to.
    pub redirect_uri: String,
    /// Whether `redirect_uri` was in the request. If so, it must be repeated
    /// at the token endpoint.
    pub redirect_uri_supplied: bool,
    pub response_type: ResponseType,
    pub scopes: ScopeSet,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,
    pub nonce: Option<String>,
    /// `prompt=none`: fail instead of showing any UI.
    pub prompt_none: bool,
}

impl AuthorizationRequest {
    #[must_use]
    pub fn is_openid(&self) -> bool {
        self.scopes.contains(OPENID)
    }

    /// An error sent back to the client's redirect URI.
    #[must_use]
    pub fn error_redirect(&self, error: OAuthError) -> AuthorizeError {
        AuthorizeError {
            error,
            redirect: Some(ErrorRedirect {
                redirect_uri: self.redirect_uri.clone(),
                state: self.state.clone(),
                mode: self.response_type.response_mode(),
            }),
        }
    }

    /// The success redirect carrying `params` and `state`.
    pub fn success_location(&self, params: &[(&str, &str)]) -> OAuthResult<String> {
        let mut all = params.to_vec();
        if let Some(state) = &self.state {
            all.push(("state", state.as_str()));
        }
        redirect_location(&self.redirect_uri, self.response_type.response_mode(), &all)
    }
}

/// The request together with the client registration it was checked against.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub request: AuthorizationRequest,
    pub client: RegisteredClient,
}

/// Where to report an authorization error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRedirect {
    pub redirect_uri: String,
    pub state: Option<String>,
    pub mode: ResponseMode,
}

/// An authorization endpoint failure and how to report it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeError {
    pub error: OAuthError,
    /// `None` when the redirect URI could not be trusted.
    pub redirect: Option<ErrorRedirect>,
}

impl AuthorizeError {
    #[must_use]
    pub const fn direct(error: OAuthError) -> Self {
        Self { error, redirect: None }
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.error.code()
    }
}

impl From<OAuthError> for AuthorizeError {
    fn from(error: OAuthError) -> Self {
        Self::direct(error)
    }
}

impl IntoResponse for AuthorizeError {
    fn into_response(self) -> Response {
        let Some(redirect) = self.redirect else {
            return self.error.into_response();
        };

        let mut params =
            vec![("error", self.error.code()), ("error_description", self.error.description())];
        if let Some(state) = redirect.state.as_deref() {
            params.push(("state", state));
        }
        match redirect_location(&redirect.redirect_uri, redirect.mode, &params) {
            Ok(location) => found(&location),
            Err(err) => err.into_response(),
        }
    }
}

/// A `302 Found` to `location`.
#[must_use]
pub fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => {
            let mut response = StatusCode::FOUND.into_response();
            let headers = response.headers_mut();
            headers.insert(header::LOCATION, value);
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            response
        }
        Err(_) => OAuthError::ServerError.into_response(),
    }
}

/// Append `params` to `redirect_uri`, keeping any query it already has.
pub fn redirect_location(
    redirect_uri: &str,
    mode: ResponseMode,
    params: &[(&str, &str)],
) -> OAuthResult<String> {
    let mut url = Url::parse(redirect_uri).map_err(|e| {
        tracing::error!(error = %e, "Registered redirect_uri does not parse");
        OAuthError::ServerError
    })?;
    match mode {
        ResponseMode::Query => {
            url.query_pairs_mut().extend_pairs(params);
        }
        ResponseMode::Fragment => {
            let fragment = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(params)
                .finish();
            url.set_fragment(Some(&fragment));
        }
    }
    Ok(url.into())
}

/// Checks raw authorization parameters against a client registration.
#[derive(Debug, Clone)]
pub struct AuthorizationRequestValidator {
    allow_plain_pkce: bool,
    implicit_enabled: bool,
    store_timeout: Duration,
}

impl AuthorizationRequestValidator {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            allow_plain_pkce: config.allow_plain_pkce,
            implicit_enabled: config.grant_enabled(GrantType::Implicit),
            store_timeout: config.store_timeout,
        }
    }

    /// Validate an authorization request.
    pub async fn validate(
        &self,
        clients: &dyn ClientRepository,
        params: &Params,
    ) -> Result<ValidatedRequest, AuthorizeError> {
        // ─── Direct rejection: nothing trusted yet ───────────────────────────
        let client_id = params.require("client_id")?;
        let client = store::bounded(self.store_timeout, clients.lookup(client_id))
            .await
            .map_err(OAuthError::from)?
            .ok_or_else(|| {
                tracing::warn!(client_id = %client_id, "Authorization request for unknown client");
                OAuthError::invalid_request("unknown client_id")
            })?;

        let (redirect_uri, redirect_uri_supplied) = resolve_redirect_uri(&client, params)?;

        // ─── Redirect-reported errors ────────────────────────────────────────
        let response_type_raw = params.get("response_type").ok().flatten();
        let mode = if response_type_raw == Some("token") {
            ResponseMode::Fragment
        } else {
            ResponseMode::Query
        };
        let to_client = ErrorRedirect {
            redirect_uri: redirect_uri.clone(),
            state: params.get("state").ok().flatten().map(str::to_owned),
            mode,
        };
        let fail = |error: OAuthError| AuthorizeError {
            error,
            redirect: Some(to_client.clone()),
        };

        let state = params.get("state").map_err(fail)?.map(str::to_owned);

        let response_type = match params.get("response_type").map_err(fail)? {
            None => return Err(fail(OAuthError::invalid_request("missing response_type"))),
            Some("code") => ResponseType::Code,
            Some("token") if self.implicit_enabled => ResponseType::Token,
            Some(other) => {
                return Err(fail(OAuthError::UnsupportedResponseType(format!(
                    "response_type {other} is not supported"
                ))));
            }
        };
        let required_grant = match response_type {
            ResponseType::Code => GrantType::AuthorizationCode,
            ResponseType::Token => GrantType::Implicit,
        };
        if !client.allows_grant(required_grant) {
            return Err(fail(OAuthError::unauthorized_client(format!(
                "client may not use response_type {}",
                response_type.as_str()
            ))));
        }

        let scopes = ScopeSet::parse(params.get("scope").map_err(fail)?.unwrap_or_default())
            .map_err(fail)?;
        if !scopes.is_subset(&client.scopes) {
            tracing::warn!(
                client_id = %client.client_id,
                requested = %scopes,
                "Requested scope exceeds registration"
            );
            return Err(fail(OAuthError::invalid_scope(
                "requested scope is not allowed for this client",
            )));
        }

        let (code_challenge, code_challenge_method) = if response_type == ResponseType::Code {
            self.check_pkce(&client, params).map_err(fail)?
        } else {
            (None, None)
        };

        let nonce = params.get("nonce").map_err(fail)?.map(str::to_owned);
        let prompt_none = params
            .get("prompt")
            .map_err(fail)?
            .is_some_and(|p| p.split(' ').any(|v| v == "none"));

        let request = AuthorizationRequest {
            client_id: client.client_id.clone(),
            redirect_uri,
            redirect_uri_supplied,
            response_type,
            scopes,
            state,
            code_challenge,
            code_challenge_method,
            nonce,
            prompt_none,
        };
        tracing::debug!(
            client_id = %request.client_id,
            scope = %request.scopes,
            "Authorization request validated"
        );
        Ok(ValidatedRequest { request, client })
    }

    fn check_pkce(
        &self,
        client: &RegisteredClient,
        params: &Params,
    ) -> OAuthResult<(Option<String>, Option<CodeChallengeMethod>)> {
        let challenge = params.get("code_challenge")?;
        let method = params.get("code_challenge_method")?;

        let Some(challenge) = challenge else {
            if method.is_some() {
                return Err(OAuthError::invalid_request(
                    "code_challenge_method without code_challenge",
                ));
            }
            if client.requires_pkce() {
                return Err(OAuthError::invalid_request("code_challenge is required"));
            }
            return Ok((None, None));
        };

        if !pkce::is_well_formed(challenge) {
            return Err(OAuthError::invalid_request("code_challenge is malformed"));
        }
        let method = match method {
            None => CodeChallengeMethod::Plain,
            Some(raw) => raw.parse().map_err(|()| {
                OAuthError::invalid_request("code_challenge_method must be plain or S256")
            })?,
        };
        if method == CodeChallengeMethod::Plain && !self.allow_plain_pkce {
            return Err(OAuthError::invalid_request("code_challenge_method plain is not allowed"));
        }
        Ok((Some(challenge.to_owned()), Some(method)))
    }
}

/// The redirect URI to use, and whether the request named it.
fn resolve_redirect_uri(client: &RegisteredClient, params: &Params) -> OAuthResult<(String, bool)> {
    if let Some(uri) = params.get("redirect_uri")? {
        if client.has_redirect_uri(uri) {
            return Ok((uri.to_owned(), true));
        }
        tracing::warn!(
            client_id = %client.client_id,
            "redirect_uri does not match any registered URI"
        );
        return Err(OAuthError::invalid_request(
            "redirect_uri is not registered for this client",
        ));
    }

    // OIDC requests must always name the redirect URI.
    let openid = params
        .get("scope")?
        .is_some_and(|s| s.split(' ').any(|t| t == OPENID));
    match client.redirect_uris.as_slice() {
        [only] if !openid => Ok((only.clone(), false)),
        _ => Err(OAuthError::invalid_request("redirect_uri is required")),
    }
}
