//! OAuth 2.0 endpoint handlers for the notebook authorization server.
//!
//! Implements:
//! - RFC 9728: OAuth Protected Resource Metadata
//! - RFC 8414: OAuth Authorization Server Metadata
//! - RFC 7591: Dynamic Client Registration
//! - RFC 7636: PKCE (S256)
//! - RFC 6749: OAuth 2.0 Authorization Code Grant
//! - RFC 7009: Token Revocation
//! - RFC 7662: Token Introspection

use std::sync::Arc;

use axum::{
    Form, Json,
    extract::{Query, State, rejection::FormRejection},
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use serde::Deserialize;
use url::Url;

use super::login::render_login_page;
use super::pkce;
use super::types::{AuthorizationParams, ClientInfo, TokenResponse};
use crate::error::AuthError;
use crate::server::AuthState;

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Client(_) | Self::Credential => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_REQUEST,
        };
        (
            status,
            Json(serde_json::json!({
                "error": self.error_code(),
                "error_description": self.to_user_message()
            })),
        )
            .into_response()
    }
}

// ─── RFC 9728: Protected Resource Metadata ───────────────────────────────────

/// `GET /.well-known/oauth-protected-resource`
///
/// Tells clients where to find the authorization server for the notebook resource.
pub async fn handle_protected_resource(State(state): State<Arc<AuthState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "resource": state.resource_url,
        "authorization_servers": [state.base_url],
        "bearer_methods_supported": ["header"],
        "scopes_supported": state.scopes.supported_scopes()
    }))
}

// ─── RFC 8414: Authorization Server Metadata ─────────────────────────────────

/// `GET /.well-known/oauth-authorization-server`
pub async fn handle_auth_server_metadata(State(state): State<Arc<AuthState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "issuer": state.base_url,
        "authorization_endpoint": format!("{}/authorize", state.base_url),
        "token_endpoint": format!("{}/token", state.base_url),
        "registration_endpoint": format!("{}/register", state.base_url),
        "revocation_endpoint": format!("{}/revoke", state.base_url),
        "introspection_endpoint": format!("{}/introspect", state.base_url),
        "scopes_supported": state.scopes.supported_scopes(),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code"],
        "token_endpoint_auth_methods_supported": ["none", "client_secret_post"],
        "code_challenge_methods_supported": ["S256"]
    }))
}

// ─── RFC 7591: Dynamic Client Registration ───────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub client_name: Option<String>,
    pub redirect_uris: Option<Vec<String>>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(default)]
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: Option<String>,
}

/// `POST /register`
pub async fn handle_register(
    State(state): State<Arc<AuthState>>,
    Json(req): Json<RegisterRequest>,
) -> Response {
    let redirect_uris = req.redirect_uris.unwrap_or_default();
    if redirect_uris.is_empty() {
        return registration_error("redirect_uris is required");
    }
    if let Some(bad) = redirect_uris.iter().find(|u| Url::parse(u).is_err()) {
        return registration_error(&format!("invalid redirect_uri: {bad}"));
    }

    let mut client = ClientInfo::new(uuid::Uuid::new_v4().simple().to_string(), redirect_uris);
    client.client_name = req.client_name;
    if !req.grant_types.is_empty() {
        client.grant_types = req.grant_types;
    }
    if !req.response_types.is_empty() {
        client.response_types = req.response_types;
    }
    if req.token_endpoint_auth_method.is_some() {
        client.token_endpoint_auth_method = req.token_endpoint_auth_method;
    }

    if let Err(e) = state.provider.register_client(client.clone()).await {
        return e.into_response();
    }

    (StatusCode::CREATED, Json(client)).into_response()
}

fn registration_error(description: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "error": "invalid_client_metadata",
            "error_description": description
        })),
    )
        .into_response()
}

// ─── Authorization Endpoint ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub response_type: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub scope: Option<String>,
    pub resource: Option<String>,
}

/// `GET /authorize`
///
/// Records the request as a pending authorization and sends the user agent
/// to the login page.
pub async fn handle_authorize(
    State(state): State<Arc<AuthState>>,
    Query(query): Query<AuthorizeQuery>,
) -> Response {
    match authorize(&state, query).await {
        Ok(login_url) => (StatusCode::FOUND, [(header::LOCATION, login_url)]).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn authorize(state: &AuthState, query: AuthorizeQuery) -> Result<String, AuthError> {
    let client_id = query
        .client_id
        .ok_or_else(|| AuthError::validation("client_id", "is required"))?;
    let code_challenge = query
        .code_challenge
        .ok_or_else(|| AuthError::validation("code_challenge", "is required"))?;

    if query.response_type.as_deref() != Some("code") {
        return Err(AuthError::validation("response_type", "must be 'code'"));
    }
    if query.code_challenge_method.as_deref() != Some("S256") {
        return Err(AuthError::validation(
            "code_challenge_method",
            "must be 'S256'",
        ));
    }

    let client = state
        .provider
        .get_client(&client_id)
        .await
        .ok_or_else(|| AuthError::client(format!("Unknown client_id: {client_id}")))?;

    let (redirect_uri, explicit) = match query.redirect_uri {
        Some(uri) if client.redirect_uris.contains(&uri) => (uri, true),
        Some(_) => {
            return Err(AuthError::validation(
                "redirect_uri",
                "not registered for this client",
            ));
        }
        None => match client.redirect_uris.as_slice() {
            [only] => (only.clone(), false),
            _ => {
                return Err(AuthError::validation(
                    "redirect_uri",
                    "is required when the client registered several",
                ));
            }
        },
    };
    let redirect_uri = Url::parse(&redirect_uri)
        .map_err(|e| AuthError::validation("redirect_uri", e.to_string()))?;

    let scopes = query
        .scope
        .as_deref()
        .map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();

    state
        .provider
        .authorize(
            &client,
            AuthorizationParams {
                state: query.state,
                scopes,
                code_challenge,
                redirect_uri,
                redirect_uri_provided_explicitly: explicit,
                resource: query.resource,
            },
        )
        .await
}

// ─── Login Surface ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    pub state: Option<String>,
}

/// `GET /login`
pub async fn handle_login_page(
    State(state): State<Arc<AuthState>>,
    Query(query): Query<LoginQuery>,
) -> Response {
    let Some(oauth_state) = query.state.filter(|s| !s.is_empty()) else {
        return AuthError::validation("state", "is required").into_response();
    };
    let Some(scopes) = state.provider.pending_scopes(&oauth_state).await else {
        return AuthError::State.into_response();
    };

    Html(render_login_page(
        &state.login_callback_url(),
        &oauth_state,
        &scopes,
        &state.username_hint,
        None,
    ))
    .into_response()
}

/// Login form as submitted by the browser.
#[derive(Debug, Default, Deserialize)]
pub struct LoginForm {
    pub username: Option<String>,
    pub password: Option<String>,
    pub state: Option<String>,
}

/// A login form that passed validation.
#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub state: String,
}

impl LoginForm {
    /// Validate once at the boundary. Empty values count as missing.
    pub fn validate(self) -> Result<Credentials, AuthError> {
        fn required(value: Option<String>, field: &str) -> Result<String, AuthError> {
            value
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AuthError::validation(field, "is required"))
        }

        Ok(Credentials {
            username: required(self.username, "username")?,
            password: required(self.password, "password")?,
            state: required(self.state, "state")?,
        })
    }
}

/// `POST /login/callback`
pub async fn handle_login_submit(
    State(state): State<Arc<AuthState>>,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Response {
    let credentials = match form {
        Ok(Form(form)) => form.validate(),
        Err(rejection) => Err(AuthError::validation("form", rejection.body_text())),
    };
    let credentials = match credentials {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };

    match state
        .provider
        .authenticate(
            &credentials.username,
            &credentials.password,
            &credentials.state,
        )
        .await
    {
        Ok(redirect) => (StatusCode::FOUND, [(header::LOCATION, redirect)]).into_response(),
        Err(AuthError::Credential) => {
            let scopes = state
                .provider
                .pending_scopes(&credentials.state)
                .await
                .unwrap_or_default();
            (
                StatusCode::UNAUTHORIZED,
                Html(render_login_page(
                    &state.login_callback_url(),
                    &credentials.state,
                    &scopes,
                    &credentials.username,
                    Some(&AuthError::Credential.to_user_message()),
                )),
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

// ─── Token Endpoint ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub client_id: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

/// `POST /token`
///
/// Exchange an authorization code for an access token. Refresh grants are rejected.
pub async fn handle_token(
    State(state): State<Arc<AuthState>>,
    Form(form): Form<TokenRequest>,
) -> Response {
    let result = match form.grant_type.as_str() {
        "authorization_code" => authorization_code_grant(&state, &form).await,
        "refresh_token" => refresh_token_grant(&state, &form).await,
        _ => Err(AuthError::UnsupportedGrant),
    };

    match result {
        Ok(token) => token_success(&token),
        Err(e) => {
            tracing::warn!(grant_type = %form.grant_type, error = %e, "Token request rejected");
            e.into_response()
        }
    }
}

async fn token_client(state: &AuthState, form: &TokenRequest) -> Result<ClientInfo, AuthError> {
    let client_id = form
        .client_id
        .as_deref()
        .ok_or_else(|| AuthError::client("No client_id provided"))?;
    state
        .provider
        .get_client(client_id)
        .await
        .ok_or_else(|| AuthError::client(format!("Unknown client_id: {client_id}")))
}

async fn authorization_code_grant(
    state: &AuthState,
    form: &TokenRequest,
) -> Result<TokenResponse, AuthError> {
    let client = token_client(state, form).await?;
    let code = form
        .code
        .as_deref()
        .ok_or_else(|| AuthError::validation("code", "is required"))?;
    let code_verifier = form
        .code_verifier
        .as_deref()
        .ok_or_else(|| AuthError::validation("code_verifier", "is required"))?;

    let auth_code = state
        .provider
        .load_authorization_code(&client, code)
        .await
        .ok_or_else(|| AuthError::grant("Invalid or expired authorization code"))?;

    if auth_code.redirect_uri_provided_explicitly {
        let matches = form
            .redirect_uri
            .as_deref()
            .and_then(|u| Url::parse(u).ok())
            .is_some_and(|u| u == auth_code.redirect_uri);
        if !matches {
            return Err(AuthError::grant("redirect_uri mismatch"));
        }
    }

    if !pkce::verify_s256(code_verifier, &auth_code.code_challenge) {
        return Err(AuthError::grant("PKCE verification failed"));
    }

    state
        .provider
        .exchange_authorization_code(&client, code)
        .await
}

async fn refresh_token_grant(
    state: &AuthState,
    form: &TokenRequest,
) -> Result<TokenResponse, AuthError> {
    let client = token_client(state, form).await?;
    let refresh_token = form.refresh_token.as_deref().unwrap_or_default();
    let scopes: Vec<String> = form
        .scope
        .as_deref()
        .map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();

    state
        .provider
        .exchange_refresh_token(&client, refresh_token, &scopes)
        .await
}

/// Build a token response with required OAuth 2.0 cache headers (RFC 6749 §5.1).
fn token_success(token: &TokenResponse) -> Response {
    let mut response = Json(token).into_response();

    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

// ─── RFC 7009: Revocation ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub token: String,
    pub token_type_hint: Option<String>,
}

/// `POST /revoke`
///
/// Always answers 200, whether or not the token existed.
pub async fn handle_revoke(
    State(state): State<Arc<AuthState>>,
    Form(form): Form<RevokeRequest>,
) -> StatusCode {
    state.provider.revoke_token(&form.token).await;
    StatusCode::OK
}

// ─── RFC 7662: Introspection ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct IntrospectRequest {
    pub token: String,
}

/// `POST /introspect`
///
/// Lets a separate resource server resolve a bearer token.
pub async fn handle_introspect(
    State(state): State<Arc<AuthState>>,
    Form(form): Form<IntrospectRequest>,
) -> impl IntoResponse {
    let Some(token) = state.provider.load_access_token(&form.token).await else {
        return Json(serde_json::json!({ "active": false }));
    };

    Json(serde_json::json!({
        "active": true,
        "client_id": token.client_id,
        "scope": token.scopes.join(" "),
        "exp": token.expires_at.timestamp(),
        "token_type": "Bearer",
        "aud": token.resource,
        "sub": token.resource_owner
    }))
}
