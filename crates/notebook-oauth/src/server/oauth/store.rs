//! In-memory credential store.
//!
//! Every method is a single atomic operation on one map. Consumption of
//! single-use entries (`take_*`) removes under the write lock, so a second
//! caller always observes `None`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::types::{AccessToken, AuthorizationCode, ClientInfo, PendingAuthorization};

/// In-memory OAuth state store.
#[derive(Clone, Default)]
pub struct CredentialStore {
    clients: Arc<RwLock<HashMap<String, ClientInfo>>>,
    pending: Arc<RwLock<HashMap<String, PendingAuthorization>>>,
    auth_codes: Arc<RwLock<HashMap<String, AuthorizationCode>>>,
    access_tokens: Arc<RwLock<HashMap<String, AccessToken>>>,
}

impl CredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a client.
    pub async fn insert_client(&self, client: ClientInfo) {
        self.clients
            .write()
            .await
            .insert(client.client_id.clone(), client);
    }

    /// Look up a client by ID.
    pub async fn get_client(&self, client_id: &str) -> Option<ClientInfo> {
        self.clients.read().await.get(client_id).cloned()
    }

    pub async fn insert_pending(&self, state: String, pending: PendingAuthorization) {
        self.pending.write().await.insert(state, pending);
    }

    /// Read a pending authorization without consuming it.
    pub async fn get_pending(&self, state: &str) -> Option<PendingAuthorization> {
        self.pending.read().await.get(state).cloned()
    }

    /// Consume a pending authorization (one-time use).
    pub async fn take_pending(&self, state: &str) -> Option<PendingAuthorization> {
        self.pending.write().await.remove(state)
    }

    pub async fn insert_auth_code(&self, code: AuthorizationCode) {
        self.auth_codes
            .write()
            .await
            .insert(code.code.clone(), code);
    }

    /// Read an authorization code without consuming it.
    pub async fn get_auth_code(&self, code: &str) -> Option<AuthorizationCode> {
        self.auth_codes.read().await.get(code).cloned()
    }

    /// Consume an authorization code (one-time use).
    pub async fn take_auth_code(&self, code: &str) -> Option<AuthorizationCode> {
        self.auth_codes.write().await.remove(code)
    }

    pub async fn insert_access_token(&self, token: AccessToken) {
        self.access_tokens
            .write()
            .await
            .insert(token.token.clone(), token);
    }

    /// Load an access token, evicting it if expired.
    ///
    /// An expired token is indistinguishable from an absent one. Live tokens
    /// are served under the read lock; the write lock is taken only to evict.
    pub async fn load_access_token(&self, token: &str) -> Option<AccessToken> {
        {
            let tokens = self.access_tokens.read().await;
            let access = tokens.get(token)?;
            if !access.is_expired() {
                return Some(access.clone());
            }
        }

        // The entry may have been replaced or removed since the read.
        let mut tokens = self.access_tokens.write().await;
        let access = tokens.get(token)?;
        if access.is_expired() {
            tokens.remove(token);
            tracing::debug!("Evicted expired access token");
            return None;
        }
        Some(access.clone())
    }

    /// Remove an access token. Returns whether it was present.
    pub async fn remove_access_token(&self, token: &str) -> bool {
        self.access_tokens.write().await.remove(token).is_some()
    }

    /// Number of live entries per map: (clients, pending, codes, tokens).
    pub async fn counts(&self) -> (usize, usize, usize, usize) {
        (
            self.clients.read().await.len(),
            self.pending.read().await.len(),
            self.auth_codes.read().await.len(),
            self.access_tokens.read().await.len(),
        )
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore").finish()
    }
}
