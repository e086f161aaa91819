//! OAuth 2.0 authorization server for the notebook MCP resource.
//!
//! Issues scoped bearer tokens through an authorization-code flow with a
//! single demo login, and decides per operation whether a token's scopes
//! are sufficient.
//!
//! ## Supported Standards
//! - RFC 9728: OAuth Protected Resource Metadata
//! - RFC 8414: OAuth Authorization Server Metadata
//! - RFC 7591: Dynamic Client Registration
//! - RFC 7636: PKCE (S256)
//! - RFC 6749: Authorization Code Grant
//! - RFC 6750: Bearer Token Usage (`WWW-Authenticate`)
//! - RFC 7009 / RFC 7662: Revocation and Introspection

pub mod handlers;
pub mod login;
pub mod pkce;
pub mod provider;
pub mod scopes;
pub mod store;
pub mod types;

pub use provider::NotebookOAuthProvider;
pub use scopes::{
    AuthorizationDecision, ScopeTable, build_www_authenticate_header, check_tool_authorization,
};
pub use store::CredentialStore;
pub use types::{
    AccessToken, AuthorizationCode, AuthorizationParams, ClientInfo, PendingAuthorization,
    RefreshToken, TokenResponse,
};
