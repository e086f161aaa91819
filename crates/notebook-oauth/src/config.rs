//! Configuration for the notebook OAuth server and client.

use std::time::Duration;

use anyhow::Context;

/// OAuth protocol constants.
pub mod oauth {
    use std::time::Duration;

    /// Access token lifetime: 1 hour.
    pub const ACCESS_TOKEN_LIFETIME_SECS: u64 = 3600;

    /// Authorization code lifetime: 5 minutes.
    pub const AUTH_CODE_LIFETIME_SECS: u64 = 300;

    /// Default authorization server port.
    pub const DEFAULT_PORT: u16 = 9000;

    /// Default authorization server base URL.
    pub const DEFAULT_BASE_URL: &str = "http://localhost:9000";

    /// Default protected resource (the notebook MCP endpoint).
    pub const DEFAULT_RESOURCE_URL: &str = "http://localhost:8001/mcp";

    /// Default loopback port for the redirect callback listener.
    pub const CALLBACK_PORT: u16 = 3030;

    /// How long a client flow waits for the browser redirect.
    pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

    /// Interval at which a waiting flow checks the callback slot.
    pub const CALLBACK_POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// Demo resource owner credentials.
    pub const DEMO_USERNAME: &str = "demo_user";
    pub const DEMO_PASSWORD: &str = "demo_password";
}

/// Environment variable prefix shared by all settings.
const ENV_PREFIX: &str = "MCP_NOTEBOOK_";

/// The single resource owner credential pair accepted at login.
#[derive(Clone)]
pub struct AuthSettings {
    /// Demo username.
    pub demo_username: String,

    /// Demo password.
    pub demo_password: String,
}

impl AuthSettings {
    /// Check a submitted credential pair.
    #[must_use]
    pub fn matches(&self, username: &str, password: &str) -> bool {
        username == self.demo_username && password == self.demo_password
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            demo_username: oauth::DEMO_USERNAME.to_string(),
            demo_password: oauth::DEMO_PASSWORD.to_string(),
        }
    }
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("demo_username", &self.demo_username)
            .finish()
    }
}

/// Server and client configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Login credentials.
    pub auth: AuthSettings,

    /// Public base URL of the authorization server.
    pub base_url: String,

    /// Port the authorization server listens on.
    pub port: u16,

    /// Protected resource URL advertised in RFC 9728 metadata.
    pub resource_url: String,

    /// Loopback port for the redirect callback listener.
    pub callback_port: u16,

    /// How long a client flow waits for the redirect.
    pub callback_timeout: Duration,

    /// Access token lifetime in seconds.
    pub access_token_lifetime: u64,

    /// Authorization code lifetime in seconds.
    pub auth_code_lifetime: u64,
}

impl Config {
    /// Create a configuration for the given base URL with default lifetimes.
    #[must_use]
    pub fn new(base_url: impl Into<String>, auth: AuthSettings) -> Self {
        Self {
            auth,
            base_url: base_url.into(),
            port: oauth::DEFAULT_PORT,
            resource_url: oauth::DEFAULT_RESOURCE_URL.to_string(),
            callback_port: oauth::CALLBACK_PORT,
            callback_timeout: oauth::CALLBACK_TIMEOUT,
            access_token_lifetime: oauth::ACCESS_TOKEN_LIFETIME_SECS,
            auth_code_lifetime: oauth::AUTH_CODE_LIFETIME_SECS,
        }
    }

    /// Create a test configuration bound to an ephemeral callback port.
    #[must_use]
    pub fn for_testing(base_url: &str) -> Self {
        Self {
            callback_port: 0,
            callback_timeout: Duration::from_secs(5),
            ..Self::new(base_url, AuthSettings::default())
        }
    }

    /// Create configuration from environment variables (and a `.env` file if present).
    ///
    /// # Errors
    ///
    /// Returns error if a numeric variable cannot be parsed.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let defaults = AuthSettings::default();
        let auth = AuthSettings {
            demo_username: env_var("DEMO_USERNAME").unwrap_or(defaults.demo_username),
            demo_password: env_var("DEMO_PASSWORD").unwrap_or(defaults.demo_password),
        };

        let base_url = env_var("BASE_URL").unwrap_or_else(|| oauth::DEFAULT_BASE_URL.into());
        let mut config = Self::new(base_url, auth);

        if let Some(url) = env_var("RESOURCE_URL") {
            config.resource_url = url;
        }
        if let Some(port) = env_var("PORT") {
            config.port = port
                .parse()
                .with_context(|| format!("{ENV_PREFIX}PORT: {port}"))?;
        }
        if let Some(port) = env_var("CALLBACK_PORT") {
            config.callback_port = port
                .parse()
                .with_context(|| format!("{ENV_PREFIX}CALLBACK_PORT: {port}"))?;
        }

        Ok(config)
    }

    /// URL of the login surface that `authorize` redirects to.
    #[must_use]
    pub fn login_url(&self) -> String {
        format!("{}/login", self.base_url.trim_end_matches('/'))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(oauth::DEFAULT_BASE_URL, AuthSettings::default())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .filter(|v| !v.is_empty())
}
