//! Resource-server side: bearer token resolution and per-operation scope enforcement.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::DateTime;
use serde::Deserialize;

use super::oauth::scopes::{
    AuthorizationDecision, ScopeTable, build_www_authenticate_header, check_tool_authorization,
};
use super::oauth::{AccessToken, NotebookOAuthProvider};

/// Resolves a presented bearer token to an access token.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Unknown, expired and otherwise unusable tokens all resolve to `None`.
    async fn verify_token(&self, token: &str) -> Option<AccessToken>;
}

/// Verifies tokens against an in-process provider.
#[derive(Debug, Clone)]
pub struct ProviderTokenVerifier {
    provider: Arc<NotebookOAuthProvider>,
}

impl ProviderTokenVerifier {
    #[must_use]
    pub const fn new(provider: Arc<NotebookOAuthProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl TokenVerifier for ProviderTokenVerifier {
    async fn verify_token(&self, token: &str) -> Option<AccessToken> {
        self.provider.load_access_token(token).await
    }
}

/// RFC 7662 introspection response, as far as this verifier reads it.
#[derive(Debug, Deserialize)]
struct IntrospectionResponse {
    #[serde(default)]
    active: bool,
    client_id: Option<String>,
    scope: Option<String>,
    exp: Option<i64>,
    aud: Option<Audience>,
    sub: Option<String>,
}

/// `aud` may be a single string or a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn first(&self) -> Option<&str> {
        match self {
            Self::One(aud) => Some(aud),
            Self::Many(auds) => auds.first().map(String::as_str),
        }
    }

    fn contains(&self, resource: &str) -> bool {
        let resource = resource.trim_end_matches('/');
        match self {
            Self::One(aud) => aud.trim_end_matches('/') == resource,
            Self::Many(auds) => auds.iter().any(|a| a.trim_end_matches('/') == resource),
        }
    }
}

/// Verifies tokens by calling a remote authorization server's introspection endpoint.
#[derive(Debug, Clone)]
pub struct IntrospectionTokenVerifier {
    http: reqwest::Client,
    introspection_endpoint: String,
    server_url: String,
    validate_resource: bool,
}

impl IntrospectionTokenVerifier {
    /// `server_url` is this resource server's URL; with `validate_resource`
    /// set, only tokens whose audience is that URL are accepted.
    #[must_use]
    pub fn new(
        introspection_endpoint: impl Into<String>,
        server_url: impl Into<String>,
        validate_resource: bool,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            introspection_endpoint: introspection_endpoint.into(),
            server_url: server_url.into(),
            validate_resource,
        }
    }

    async fn introspect(&self, token: &str) -> Result<IntrospectionResponse, reqwest::Error> {
        self.http
            .post(&self.introspection_endpoint)
            .form(&[("token", token)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[async_trait]
impl TokenVerifier for IntrospectionTokenVerifier {
    async fn verify_token(&self, token: &str) -> Option<AccessToken> {
        let data = match self.introspect(token).await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    endpoint = %self.introspection_endpoint,
                    "Token introspection failed"
                );
                return None;
            }
        };

        if !data.active {
            return None;
        }

        let audience_matches = data
            .aud
            .as_ref()
            .is_some_and(|aud| aud.contains(&self.server_url));
        if self.validate_resource && !audience_matches {
            tracing::warn!(
                server_url = %self.server_url,
                "Token audience does not match this resource"
            );
            return None;
        }

        // Tokens without `exp` are rejected.
        let expires_at = data.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))?;

        let token = AccessToken {
            token: token.to_string(),
            client_id: data.client_id.unwrap_or_else(|| "unknown".to_string()),
            scopes: data
                .scope
                .as_deref()
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            expires_at,
            resource: data
                .aud
                .as_ref()
                .and_then(Audience::first)
                .map(str::to_string),
            resource_owner: data.sub,
        };
        (!token.is_expired()).then_some(token)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Enforces the scope table for each protected operation.
#[derive(Debug, Clone)]
pub struct ResourceGuard<V> {
    verifier: V,
    scopes: ScopeTable,
    resource_metadata_url: Option<String>,
}

impl<V: TokenVerifier> ResourceGuard<V> {
    #[must_use]
    pub const fn new(
        verifier: V,
        scopes: ScopeTable,
        resource_metadata_url: Option<String>,
    ) -> Self {
        Self {
            verifier,
            scopes,
            resource_metadata_url,
        }
    }

    /// Scope table consulted by this guard.
    #[must_use]
    pub const fn scopes(&self) -> &ScopeTable {
        &self.scopes
    }

    /// Authorize a call to `operation`.
    ///
    /// Returns the caller's token (if any) when the call may proceed, or the
    /// 401/403 challenge response to send back.
    ///
    /// # Errors
    ///
    /// Returns the rejection response when the token is missing or lacks a required scope.
    pub async fn check(
        &self,
        operation: &str,
        headers: &HeaderMap,
    ) -> Result<Option<AccessToken>, Response> {
        let required = self.scopes.required_scopes(operation);
        if required.is_empty() {
            return Ok(None);
        }

        let token = match bearer_token(headers) {
            Some(raw) => self.verifier.verify_token(raw).await,
            None => None,
        };

        let decision = check_tool_authorization(required, token.as_ref());
        let description = match &decision {
            AuthorizationDecision::Ok => return Ok(token),
            AuthorizationDecision::MissingAuth => "Authentication required".to_string(),
            AuthorizationDecision::InsufficientScope { missing } => {
                format!("Required scope: {missing}")
            }
        };

        tracing::debug!(operation, decision = ?decision, "Rejected operation");
        Err(self.challenge(&decision, &description, required))
    }

    fn challenge(
        &self,
        decision: &AuthorizationDecision,
        description: &str,
        required: &[String],
    ) -> Response {
        let status = decision.status_code().unwrap_or(StatusCode::UNAUTHORIZED);
        let error = decision.error_code().unwrap_or("invalid_token");
        let header_value = build_www_authenticate_header(
            error,
            description,
            Some(required),
            self.resource_metadata_url.as_deref(),
        );

        let mut response = (
            status,
            Json(serde_json::json!({
                "error": error,
                "error_description": description
            })),
        )
            .into_response();

        if let Ok(value) = HeaderValue::from_str(&header_value) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, value);
        }
        response
    }
}
