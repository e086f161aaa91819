//! Client side of the authorization-code flow.
//!
//! Registers dynamically, sends the user to the authorization server,
//! captures the redirect on a loopback [`CallbackServer`] and exchanges the
//! code for a token.

pub mod callback;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::Url;

pub use callback::CallbackServer;

use crate::error::{FlowError, FlowResult};
use crate::server::oauth::pkce::PkceChallenge;
use crate::server::oauth::types::{ClientInfo, TokenResponse};

/// A token held by the client, with its expiry made absolute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredToken {
    #[must_use]
    pub fn from_response(response: TokenResponse) -> Self {
        let expires_at = response
            .expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs));
        Self {
            access_token: response.access_token,
            token_type: response.token_type,
            scope: response.scope,
            expires_at,
        }
    }

    /// Tokens without an expiry never expire client-side.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Utc::now() >= exp)
    }

    /// True if this token was granted every scope in `scopes`.
    #[must_use]
    pub fn covers<S: AsRef<str>>(&self, scopes: &[S]) -> bool {
        let granted: Vec<&str> = self
            .scope
            .as_deref()
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default();
        scopes.iter().all(|s| granted.contains(&s.as_ref()))
    }
}

/// Where a client keeps its registration and tokens between flows.
#[async_trait]
pub trait TokenStorage: Send + Sync {
    async fn get_tokens(&self) -> Option<StoredToken>;
    async fn set_tokens(&self, tokens: StoredToken);
    async fn get_client_info(&self) -> Option<ClientInfo>;
    async fn set_client_info(&self, client_info: ClientInfo);
}

/// Process-local storage; forgotten on exit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTokenStorage {
    tokens: Arc<RwLock<Option<StoredToken>>>,
    client_info: Arc<RwLock<Option<ClientInfo>>>,
}

impl InMemoryTokenStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStorage for InMemoryTokenStorage {
    async fn get_tokens(&self) -> Option<StoredToken> {
        self.tokens.read().await.clone()
    }

    async fn set_tokens(&self, tokens: StoredToken) {
        *self.tokens.write().await = Some(tokens);
    }

    async fn get_client_info(&self) -> Option<ClientInfo> {
        self.client_info.read().await.clone()
    }

    async fn set_client_info(&self, client_info: ClientInfo) {
        *self.client_info.write().await = Some(client_info);
    }
}

/// RFC 8414 metadata, as far as the client needs it.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthServerMetadata {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub registration_endpoint: Option<String>,
}

/// Drives the authorization-code flow against one authorization server.
#[derive(Debug)]
pub struct OAuthClient<S = InMemoryTokenStorage> {
    http: reqwest::Client,
    server_url: Url,
    resource_url: String,
    client_name: String,
    storage: S,
}

impl<S: TokenStorage> OAuthClient<S> {
    /// # Errors
    ///
    /// Returns [`FlowError::Url`] if `server_url` is not a valid URL.
    pub fn new(
        server_url: &str,
        resource_url: impl Into<String>,
        client_name: impl Into<String>,
        storage: S,
    ) -> FlowResult<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            server_url: Url::parse(server_url)?,
            resource_url: resource_url.into(),
            client_name: client_name.into(),
            storage,
        })
    }

    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Obtain a token carrying `scopes`.
    ///
    /// A stored, unexpired token that already covers `scopes` is returned as
    /// is. Otherwise the authorization URL is handed to `redirect_handler`
    /// (which should send the user's browser there) and the flow waits on
    /// `callback` for the redirect.
    ///
    /// # Errors
    ///
    /// - [`FlowError::Callback`] on timeout or an `error` redirect
    /// - [`FlowError::StateMismatch`] if the redirect carried a foreign `state`
    /// - [`FlowError::Endpoint`] / [`FlowError::Http`] if a server call fails
    pub async fn authorize<F, Fut>(
        &self,
        callback: &CallbackServer,
        scopes: &[String],
        timeout: Duration,
        redirect_handler: F,
    ) -> FlowResult<StoredToken>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = ()>,
    {
        if let Some(token) = self.storage.get_tokens().await {
            if !token.is_expired() && token.covers(scopes) {
                tracing::debug!("Reusing stored access token");
                return Ok(token);
            }
        }

        let metadata = self.discover().await?;
        let redirect_uri = callback.redirect_uri();
        let client = self.client_info(&metadata, &redirect_uri).await?;

        let pkce = PkceChallenge::generate();
        let state = uuid::Uuid::new_v4().simple().to_string();
        let auth_url = build_authorization_url(
            &metadata.authorization_endpoint,
            &client.client_id,
            &redirect_uri,
            scopes,
            &state,
            &pkce.challenge,
            &self.resource_url,
        )?;

        tracing::info!(client_id = %client.client_id, scopes = ?scopes, "Starting authorization");
        redirect_handler(auth_url).await;

        let (code, returned_state) = callback.wait_for_callback(timeout).await?;
        if returned_state.as_deref() != Some(state.as_str()) {
            return Err(FlowError::StateMismatch);
        }

        let response = self
            .exchange_code(
                &metadata.token_endpoint,
                &code,
                &redirect_uri,
                &client.client_id,
                &pkce.verifier,
            )
            .await?;
        let token = StoredToken::from_response(response);
        self.storage.set_tokens(token.clone()).await;

        tracing::info!(scope = ?token.scope, "Authorization complete");
        Ok(token)
    }

    /// Fetch the server's RFC 8414 metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server answers non-2xx.
    pub async fn discover(&self) -> FlowResult<AuthServerMetadata> {
        let url = self
            .server_url
            .join("/.well-known/oauth-authorization-server")?;
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(endpoint_error(response).await);
        }
        Ok(response.json().await?)
    }

    /// The stored registration if it covers `redirect_uri`, else a fresh one.
    async fn client_info(
        &self,
        metadata: &AuthServerMetadata,
        redirect_uri: &str,
    ) -> FlowResult<ClientInfo> {
        if let Some(info) = self.storage.get_client_info().await {
            if info.redirect_uris.iter().any(|u| u == redirect_uri) {
                return Ok(info);
            }
        }

        let endpoint = match &metadata.registration_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => self.server_url.join("/register")?.to_string(),
        };

        let body = serde_json::json!({
            "client_name": self.client_name,
            "redirect_uris": [redirect_uri],
            "grant_types": ["authorization_code"],
            "response_types": ["code"],
            "token_endpoint_auth_method": "none",
        });

        let response = self.http.post(&endpoint).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(endpoint_error(response).await);
        }

        let info: ClientInfo = response.json().await?;
        tracing::info!(client_id = %info.client_id, "Registered client");
        self.storage.set_client_info(info.clone()).await;
        Ok(info)
    }

    async fn exchange_code(
        &self,
        token_endpoint: &str,
        code: &str,
        redirect_uri: &str,
        client_id: &str,
        code_verifier: &str,
    ) -> FlowResult<TokenResponse> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", client_id),
            ("code_verifier", code_verifier),
        ];

        let response = self.http.post(token_endpoint).form(&params).send().await?;
        if !response.status().is_success() {
            return Err(endpoint_error(response).await);
        }
        Ok(response.json().await?)
    }
}

/// Turn a non-2xx response into [`FlowError::Endpoint`].
async fn endpoint_error(response: reqwest::Response) -> FlowError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    FlowError::endpoint(status, body)
}

/// Build the authorization request URL (RFC 6749 §4.1.1, RFC 7636, RFC 8707).
///
/// `scope` is omitted when no scopes are requested.
///
/// # Errors
///
/// Returns [`FlowError::Url`] if `authorization_endpoint` is not a valid URL.
pub fn build_authorization_url<S: AsRef<str>>(
    authorization_endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    scopes: &[S],
    state: &str,
    code_challenge: &str,
    resource: &str,
) -> FlowResult<String> {
    let mut url = Url::parse(authorization_endpoint)?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("response_type", "code");
        query.append_pair("client_id", client_id);
        query.append_pair("redirect_uri", redirect_uri);
        if !scopes.is_empty() {
            let scope = scopes
                .iter()
                .map(AsRef::<str>::as_ref)
                .collect::<Vec<_>>()
                .join(" ");
            query.append_pair("scope", &scope);
        }
        query.append_pair("state", state);
        query.append_pair("code_challenge", code_challenge);
        query.append_pair("code_challenge_method", "S256");
        query.append_pair("resource", resource);
    }
    Ok(url.to_string())
}

/// Try to open `url` in the user's browser. Failures are ignored; the caller
/// should also print the URL.
pub fn try_open_browser(url: &str) {
    #[cfg(target_os = "macos")]
    let opener = Some("open");
    #[cfg(target_os = "linux")]
    let opener = Some("xdg-open");
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    let opener: Option<&str> = None;

    if let Some(opener) = opener {
        if let Err(e) = std::process::Command::new(opener).arg(url).spawn() {
            tracing::debug!(error = %e, "Could not open browser");
        }
    }
}
