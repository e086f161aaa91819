//! Notebook OAuth
//!
//! Scoped OAuth 2.0 authorization for an MCP notebook server: an embedded
//! authorization server that issues scoped bearer tokens, a per-operation
//! scope guard for the resource server, and a client flow that captures the
//! browser redirect on a loopback listener.
//!
//! # Features
//!
//! - **Authorization code + PKCE**: single-use codes (5 min) and tokens (1 h)
//! - **Operation scopes**: `read` for listing and reading notes, `write` for edits
//! - **RFC 6750 challenges**: `WWW-Authenticate` with the required `scope`
//! - **Loopback callback**: the CLI opens a browser and waits for the redirect
//!
//! # Example
//!
//! ```no_run
//! use notebook_oauth::{config::Config, server::AuthServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     AuthServer::new(config).run_http().await
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod server;

pub use client::{CallbackServer, InMemoryTokenStorage, OAuthClient, TokenStorage};
pub use config::Config;
pub use error::{AuthError, CallbackError, FlowError};
pub use server::oauth::{AuthorizationDecision, NotebookOAuthProvider, ScopeTable};
