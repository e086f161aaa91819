//! Operation-level scope checking.
//!
//! Scope enforcement is opt-in per operation: an operation with no required
//! scopes is always allowed, even without a token.

use std::collections::{BTreeSet, HashMap};

use axum::http::StatusCode;

use super::types::AccessToken;

/// Outcome of an operation authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationDecision {
    /// The operation may proceed.
    Ok,
    /// Scopes are required but no valid token was presented.
    MissingAuth,
    /// The token lacks `missing`, the first required scope it does not carry.
    InsufficientScope { missing: String },
}

impl AuthorizationDecision {
    /// HTTP status the boundary should answer with, or `None` to proceed.
    #[must_use]
    pub const fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Ok => None,
            Self::MissingAuth => Some(StatusCode::UNAUTHORIZED),
            Self::InsufficientScope { .. } => Some(StatusCode::FORBIDDEN),
        }
    }

    /// `error` value for the `WWW-Authenticate` challenge.
    #[must_use]
    pub const fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::Ok => None,
            Self::MissingAuth => Some("invalid_token"),
            Self::InsufficientScope { .. } => Some("insufficient_scope"),
        }
    }

    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Decide whether a caller holding `token` may run an operation requiring `required_scopes`.
///
/// Required scopes are checked in declared order; the first one the token
/// lacks is reported.
pub fn check_tool_authorization<S: AsRef<str>>(
    required_scopes: &[S],
    token: Option<&AccessToken>,
) -> AuthorizationDecision {
    if required_scopes.is_empty() {
        return AuthorizationDecision::Ok;
    }

    let Some(token) = token else {
        return AuthorizationDecision::MissingAuth;
    };

    let missing = required_scopes
        .iter()
        .map(AsRef::<str>::as_ref)
        .find(|scope| !token.has_scope(scope));

    match missing {
        Some(scope) => AuthorizationDecision::InsufficientScope {
            missing: scope.to_string(),
        },
        None => AuthorizationDecision::Ok,
    }
}

/// Build a `WWW-Authenticate` header value (RFC 6750 §3).
///
/// `scope` lists the required scopes in declared order and is omitted when
/// there are none; `resource_metadata` (RFC 9728) is omitted when absent.
pub fn build_www_authenticate_header<S: AsRef<str>>(
    error: &str,
    error_description: &str,
    required_scopes: Option<&[S]>,
    resource_metadata_url: Option<&str>,
) -> String {
    let mut parts = vec![
        format!(r#"error="{error}""#),
        format!(r#"error_description="{error_description}""#),
    ];

    if let Some(scopes) = required_scopes.filter(|s| !s.is_empty()) {
        let scope_value = scopes
            .iter()
            .map(AsRef::<str>::as_ref)
            .collect::<Vec<_>>()
            .join(" ");
        parts.push(format!(r#"scope="{scope_value}""#));
    }

    if let Some(url) = resource_metadata_url {
        parts.push(format!(r#"resource_metadata="{url}""#));
    }

    format!("Bearer {}", parts.join(", "))
}

/// Which scopes each operation requires.
///
/// Owned by whoever registers operations; this module only reads it.
#[derive(Debug, Clone, Default)]
pub struct ScopeTable {
    operations: HashMap<String, Vec<String>>,
}

impl ScopeTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The notebook server's operations: reads need `read`, edits need `write`.
    #[must_use]
    pub fn notebook() -> Self {
        Self::new()
            .with("list_notes", &["read"])
            .with("read_note", &["read"])
            .with("add_note", &["write"])
            .with("edit_note", &["write"])
    }

    /// Declare the scopes an operation requires, in the order they are checked.
    #[must_use]
    pub fn with(mut self, operation: &str, scopes: &[&str]) -> Self {
        let scopes = scopes.iter().map(|s| (*s).to_string()).collect();
        self.operations.insert(operation.to_string(), scopes);
        self
    }

    /// Required scopes for an operation. Unknown operations require none.
    #[must_use]
    pub fn required_scopes(&self, operation: &str) -> &[String] {
        self.operations
            .get(operation)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Sorted union of the scopes required by `operations`.
    ///
    /// Lets a client request one token covering several operations.
    #[must_use]
    pub fn aggregate<S: AsRef<str>>(&self, operations: &[S]) -> Vec<String> {
        operations
            .iter()
            .flat_map(|op| self.required_scopes(op.as_ref()))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Every scope any operation requires, sorted.
    #[must_use]
    pub fn supported_scopes(&self) -> Vec<String> {
        self.operations
            .values()
            .flatten()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
