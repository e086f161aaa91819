//! Authorization server and resource-side guard.
//!
//! The authorization server runs over HTTP; the guard is embedded by
//! whichever server hosts the protected notebook operations.

pub mod oauth;
pub mod resource;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    response::IntoResponse,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use oauth::{NotebookOAuthProvider, ScopeTable, handlers};

/// Shared state for the authorization server's handlers.
#[derive(Debug)]
pub struct AuthState {
    pub provider: Arc<NotebookOAuthProvider>,
    /// Public base URL, without trailing slash.
    pub base_url: String,
    pub resource_url: String,
    pub scopes: ScopeTable,
    /// Prefilled on the login form.
    pub username_hint: String,
}

impl AuthState {
    /// Target of the login form.
    #[must_use]
    pub fn login_callback_url(&self) -> String {
        format!("{}/login/callback", self.base_url)
    }
}

/// Create the authorization server router.
pub fn create_router(
    provider: Arc<NotebookOAuthProvider>,
    config: &Config,
    scopes: ScopeTable,
) -> Router {
    let state = Arc::new(AuthState {
        provider,
        base_url: config.base_url.trim_end_matches('/').to_string(),
        resource_url: config.resource_url.clone(),
        scopes,
        username_hint: config.auth.demo_username.clone(),
    });

    Router::new()
        .route("/health", get(health_check))
        .route(
            "/.well-known/oauth-authorization-server",
            get(handlers::handle_auth_server_metadata),
        )
        .route(
            "/.well-known/oauth-protected-resource",
            get(handlers::handle_protected_resource),
        )
        .route("/register", post(handlers::handle_register))
        .route("/authorize", get(handlers::handle_authorize))
        .route("/login", get(handlers::handle_login_page))
        .route("/login/callback", post(handlers::handle_login_submit))
        .route("/token", post(handlers::handle_token))
        .route("/revoke", post(handlers::handle_revoke))
        .route("/introspect", post(handlers::handle_introspect))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "notebook-oauth",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// The notebook authorization server.
pub struct AuthServer {
    provider: Arc<NotebookOAuthProvider>,
    config: Config,
    scopes: ScopeTable,
}

impl AuthServer {
    /// Create a server with an empty credential store.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            provider: Arc::new(NotebookOAuthProvider::new(&config)),
            config,
            scopes: ScopeTable::notebook(),
        }
    }

    /// The provider backing this server, for in-process token verification.
    #[must_use]
    pub fn provider(&self) -> Arc<NotebookOAuthProvider> {
        Arc::clone(&self.provider)
    }

    /// Run the server until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be bound or on server failure.
    pub async fn run_http(self) -> anyhow::Result<()> {
        let router = create_router(self.provider, &self.config, self.scopes);
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));

        tracing::info!(
            base_url = %self.config.base_url,
            "Authorization server listening on http://{}",
            addr
        );

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Authorization server shut down");
        Ok(())
    }
}

impl std::fmt::Debug for AuthServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthServer")
            .field("port", &self.config.port)
            .finish()
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received shutdown signal");
}
