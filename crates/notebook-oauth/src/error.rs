//! Error types for the notebook OAuth server and client flow.
//!
//! Uses `thiserror` for structured error handling with automatic `From` implementations.
//! Scope failures are not errors here; they surface as
//! [`AuthorizationDecision`](crate::server::oauth::scopes::AuthorizationDecision) values.

use std::time::Duration;

/// Errors raised by the authorization state machine.
#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    /// Unknown or invalid client (registration or authorization start)
    #[error("Invalid client: {0}")]
    Client(String),

    /// Unknown or already-consumed `state`
    #[error("Invalid state parameter")]
    State,

    /// Username/password did not match
    #[error("Invalid credentials")]
    Credential,

    /// Unknown, expired, or already-consumed authorization code
    #[error("Invalid grant: {0}")]
    Grant(String),

    /// Refresh tokens are never issued
    #[error("Refresh tokens are not supported")]
    UnsupportedGrant,

    /// Request failed boundary validation
    #[error("Validation error: {message}")]
    Validation {
        /// Field that failed validation
        field: String,
        /// Validation error message
        message: String,
    },
}

impl AuthError {
    /// Create a client error.
    #[must_use]
    pub fn client(message: impl Into<String>) -> Self {
        Self::Client(message.into())
    }

    /// Create a grant error.
    #[must_use]
    pub fn grant(message: impl Into<String>) -> Self {
        Self::Grant(message.into())
    }

    /// Create a validation error.
    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// OAuth 2.0 error code (RFC 6749 §5.2) for this error.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Client(_) => "invalid_client",
            Self::State | Self::Validation { .. } => "invalid_request",
            Self::Credential => "access_denied",
            Self::Grant(_) => "invalid_grant",
            Self::UnsupportedGrant => "unsupported_grant_type",
        }
    }

    /// Authorization errors are never worth retrying unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        false
    }

    /// Convert to a short, user-facing message. Never includes submitted secrets.
    #[must_use]
    pub fn to_user_message(&self) -> String {
        match self {
            Self::State => {
                "This sign-in link has expired or was already used. Start the authorization again."
                    .to_string()
            }
            Self::Credential => "Invalid username or password.".to_string(),
            Self::Validation { field, message } => {
                format!("Invalid input for '{field}': {message}")
            }
            _ => self.to_string(),
        }
    }
}

/// Errors from the loopback callback bridge.
#[derive(thiserror::Error, Debug)]
pub enum CallbackError {
    /// No redirect arrived in time
    #[error("Timed out after {0:?} waiting for OAuth callback")]
    Timeout(Duration),

    /// The redirect carried an explicit `error` parameter
    #[error("OAuth error: {0}")]
    Authorization(String),

    /// The listener could not be bound
    #[error("Failed to bind callback listener: {0}")]
    Bind(#[from] std::io::Error),
}

impl CallbackError {
    /// Only a timeout is worth retrying; a rejected authorization is final.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Errors from the client-side authorization flow.
#[derive(thiserror::Error, Debug)]
pub enum FlowError {
    /// Callback bridge failure (timeout or rejected authorization)
    #[error(transparent)]
    Callback(#[from] CallbackError),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Authorization server answered with a non-success status
    #[error("Endpoint returned {status}: {body}")]
    Endpoint {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// Callback `state` did not match the one sent
    #[error("State mismatch in OAuth callback")]
    StateMismatch,

    /// Malformed URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl FlowError {
    /// Create an endpoint error.
    #[must_use]
    pub fn endpoint(status: u16, body: impl Into<String>) -> Self {
        Self::Endpoint {
            status,
            body: body.into(),
        }
    }

    /// Returns true if the flow ended because no callback arrived in time.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Callback(CallbackError::Timeout(_)))
    }
}

/// Result type alias for authorization operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Result type alias for client flow operations.
pub type FlowResult<T> = Result<T, FlowError>;
