//! Authorization state machine for the notebook server.
//!
//! Drives a client from registration through a pending authorization, a
//! successful login and a code exchange to an issued access token:
//!
//! ```text
//! REGISTERED -> AUTHORIZATION_PENDING -> CODE_ISSUED -> TOKEN_ISSUED -> REVOKED | EXPIRED
//! ```
//!
//! A client may begin a new authorization at any time; each flow yields one token.

use chrono::{Duration, Utc};
use url::Url;

use super::store::CredentialStore;
use super::types::{
    AccessToken, AuthorizationCode, AuthorizationParams, ClientInfo, PendingAuthorization,
    RefreshToken, TokenResponse,
};
use crate::config::{AuthSettings, Config};
use crate::error::{AuthError, AuthResult};

/// OAuth provider with multi-scope support and a single demo login.
pub struct NotebookOAuthProvider {
    settings: AuthSettings,
    login_url: String,
    access_token_lifetime: u64,
    auth_code_lifetime: u64,
    store: CredentialStore,
}

impl NotebookOAuthProvider {
    /// Create a provider with an empty store.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            settings: config.auth.clone(),
            login_url: config.login_url(),
            access_token_lifetime: config.access_token_lifetime,
            auth_code_lifetime: config.auth_code_lifetime,
            store: CredentialStore::new(),
        }
    }

    /// The backing credential store.
    #[must_use]
    pub const fn store(&self) -> &CredentialStore {
        &self.store
    }

    fn generate_code() -> String {
        format!("mcp_{}", uuid::Uuid::new_v4().simple())
    }

    /// 256 bits, hex.
    fn generate_access_token() -> String {
        format!(
            "mcp_{}{}",
            uuid::Uuid::new_v4().simple(),
            uuid::Uuid::new_v4().simple()
        )
    }

    fn generate_state() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    /// Look up a registered client.
    pub async fn get_client(&self, client_id: &str) -> Option<ClientInfo> {
        self.store.get_client(client_id).await
    }

    /// Register a client. Re-registering an existing id overwrites it.
    pub async fn register_client(&self, client: ClientInfo) -> AuthResult<()> {
        if client.client_id.is_empty() {
            return Err(AuthError::client("No client_id provided"));
        }
        tracing::info!(client_id = %client.client_id, "Registered OAuth client");
        self.store.insert_client(client).await;
        Ok(())
    }

    /// Begin an authorization and return the login URL for the user agent.
    ///
    /// Requested scopes are stored verbatim; which scopes exist is not this
    /// provider's concern.
    pub async fn authorize(
        &self,
        client: &ClientInfo,
        params: AuthorizationParams,
    ) -> AuthResult<String> {
        if self.store.get_client(&client.client_id).await.is_none() {
            let message = format!("Unknown client_id: {}", client.client_id);
            return Err(AuthError::client(message));
        }

        // An empty state counts as absent.
        let state = params
            .state
            .filter(|s| !s.is_empty())
            .unwrap_or_else(Self::generate_state);

        self.store
            .insert_pending(
                state.clone(),
                PendingAuthorization {
                    redirect_uri: params.redirect_uri,
                    code_challenge: params.code_challenge,
                    redirect_uri_provided_explicitly: params.redirect_uri_provided_explicitly,
                    client_id: client.client_id.clone(),
                    resource: params.resource,
                    scopes: params.scopes,
                },
            )
            .await;

        tracing::debug!(client_id = %client.client_id, "Authorization pending login");

        Ok(login_redirect(&self.login_url, &state, &client.client_id))
    }

    /// Scopes requested by a pending authorization, for display on the login page.
    pub async fn pending_scopes(&self, state: &str) -> Option<Vec<String>> {
        self.store.get_pending(state).await.map(|p| p.scopes)
    }

    /// Complete a login and mint an authorization code.
    ///
    /// Returns the client redirect URI carrying `code` and the original `state`.
    /// A failed credential check leaves the pending authorization in place.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        state: &str,
    ) -> AuthResult<String> {
        if self.store.get_pending(state).await.is_none() {
            return Err(AuthError::State);
        }

        if !self.settings.matches(username, password) {
            tracing::warn!("Rejected login with invalid credentials");
            return Err(AuthError::Credential);
        }

        // Lost a race with a concurrent login for the same state.
        let Some(pending) = self.store.take_pending(state).await else {
            return Err(AuthError::State);
        };

        let code = AuthorizationCode {
            code: Self::generate_code(),
            client_id: pending.client_id,
            redirect_uri: pending.redirect_uri,
            redirect_uri_provided_explicitly: pending.redirect_uri_provided_explicitly,
            expires_at: Utc::now() + lifetime(self.auth_code_lifetime),
            scopes: pending.scopes,
            code_challenge: pending.code_challenge,
            resource: pending.resource,
            resource_owner: username.to_string(),
        };

        let redirect = construct_redirect_uri(&code.redirect_uri, &code.code, state);

        tracing::info!(
            client_id = %code.client_id,
            scopes = ?code.scopes,
            "Issued authorization code"
        );
        self.store.insert_auth_code(code).await;

        Ok(redirect)
    }

    /// Look up an authorization code without consuming it.
    ///
    /// Codes issued to another client, or past their expiry, resolve to `None`.
    pub async fn load_authorization_code(
        &self,
        client: &ClientInfo,
        code: &str,
    ) -> Option<AuthorizationCode> {
        self.store
            .get_auth_code(code)
            .await
            .filter(|c| c.client_id == client.client_id && !c.is_expired())
    }

    /// Exchange an authorization code for an access token.
    ///
    /// The code is consumed whether or not the exchange succeeds. The token
    /// carries exactly the code's scopes.
    pub async fn exchange_authorization_code(
        &self,
        client: &ClientInfo,
        code: &str,
    ) -> AuthResult<TokenResponse> {
        if client.client_id.is_empty() {
            return Err(AuthError::client("No client_id provided"));
        }

        let Some(auth_code) = self.store.take_auth_code(code).await else {
            return Err(AuthError::grant("Invalid authorization code"));
        };
        if auth_code.is_expired() {
            return Err(AuthError::grant("Authorization code expired"));
        }
        if auth_code.client_id != client.client_id {
            return Err(AuthError::grant("Code was issued to another client"));
        }

        let token = Self::generate_access_token();
        let scope = auth_code.scopes.join(" ");

        self.store
            .insert_access_token(AccessToken {
                token: token.clone(),
                client_id: client.client_id.clone(),
                scopes: auth_code.scopes,
                expires_at: Utc::now() + lifetime(self.access_token_lifetime),
                resource: auth_code.resource,
                resource_owner: Some(auth_code.resource_owner),
            })
            .await;

        tracing::info!(client_id = %client.client_id, scope = %scope, "Issued access token");

        Ok(TokenResponse {
            access_token: token,
            token_type: "Bearer".to_string(),
            expires_in: Some(self.access_token_lifetime),
            scope: Some(scope),
            refresh_token: None,
        })
    }

    /// Load an access token. Absent and expired tokens both resolve to `None`.
    pub async fn load_access_token(&self, token: &str) -> Option<AccessToken> {
        self.store.load_access_token(token).await
    }

    /// Revoke a token. Unknown tokens are ignored.
    pub async fn revoke_token(&self, token: &str) {
        if self.store.remove_access_token(token).await {
            tracing::info!("Revoked access token");
        }
    }

    /// Refresh tokens are never issued, so lookup always fails.
    pub async fn load_refresh_token(
        &self,
        _client: &ClientInfo,
        _refresh_token: &str,
    ) -> Option<RefreshToken> {
        None
    }

    /// Refresh token exchange is unsupported.
    pub async fn exchange_refresh_token(
        &self,
        _client: &ClientInfo,
        _refresh_token: &str,
        _scopes: &[String],
    ) -> AuthResult<TokenResponse> {
        Err(AuthError::UnsupportedGrant)
    }
}

impl std::fmt::Debug for NotebookOAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotebookOAuthProvider")
            .field("login_url", &self.login_url)
            .finish()
    }
}

fn lifetime(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

/// Append `state` and `client_id` to the login URL.
fn login_redirect(login_url: &str, state: &str, client_id: &str) -> String {
    match Url::parse(login_url) {
        Ok(mut url) => {
            url.query_pairs_mut()
                .append_pair("state", state)
                .append_pair("client_id", client_id);
            url.to_string()
        }
        Err(_) => format!("{login_url}?state={state}&client_id={client_id}"),
    }
}

/// Append `code` and `state` to a client redirect URI, keeping existing query pairs.
fn construct_redirect_uri(redirect_uri: &Url, code: &str, state: &str) -> String {
    let mut url = redirect_uri.clone();
    url.query_pairs_mut()
        .append_pair("code", code)
        .append_pair("state", state);
    url.to_string()
}
