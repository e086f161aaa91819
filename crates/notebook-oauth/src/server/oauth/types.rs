//! OAuth 2.0 types for notebook authentication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// A registered OAuth client (RFC 7591 client information).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(default)]
    pub response_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_method: Option<String>,
}

impl ClientInfo {
    /// Create client info with just an id and redirect URIs.
    #[must_use]
    pub fn new(client_id: impl Into<String>, redirect_uris: Vec<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_name: None,
            redirect_uris,
            grant_types: vec!["authorization_code".to_string()],
            response_types: vec!["code".to_string()],
            token_endpoint_auth_method: Some("none".to_string()),
        }
    }
}

/// Parameters of an authorization request.
#[derive(Debug, Clone)]
pub struct AuthorizationParams {
    /// Caller-supplied state; generated when absent.
    pub state: Option<String>,
    /// Requested scopes, in request order.
    pub scopes: Vec<String>,
    pub code_challenge: String,
    pub redirect_uri: Url,
    pub redirect_uri_provided_explicitly: bool,
    /// RFC 8707 resource indicator.
    pub resource: Option<String>,
}

/// Authorization state held between `authorize` and a successful login.
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    pub redirect_uri: Url,
    pub code_challenge: String,
    pub redirect_uri_provided_explicitly: bool,
    pub client_id: String,
    pub resource: Option<String>,
    pub scopes: Vec<String>,
}

/// An authorization code issued after a successful login.
#[derive(Debug, Clone)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    pub redirect_uri: Url,
    pub redirect_uri_provided_explicitly: bool,
    pub expires_at: DateTime<Utc>,
    pub scopes: Vec<String>,
    pub code_challenge: String,
    pub resource: Option<String>,
    pub resource_owner: String,
}

impl AuthorizationCode {
    /// Check if the code has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}

/// A bearer access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub client_id: String,
    /// Exactly the scopes of the originating authorization code.
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub resource: Option<String>,
    pub resource_owner: Option<String>,
}

impl AccessToken {
    /// Check if the token has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }

    /// Case-sensitive exact scope membership.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Refresh tokens are never issued, so no value of this type can exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshToken {}

/// Token endpoint response body (RFC 6749 §5.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl TokenResponse {
    /// Scopes granted, split from the space-delimited `scope` field.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }
}
