//! Notebook OAuth - Entry Point
//!
//! `serve` runs the authorization server; `authorize` runs the browser flow
//! against it and prints the issued token.

use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use notebook_oauth::{
    CallbackServer, InMemoryTokenStorage, OAuthClient, ScopeTable,
    client::try_open_browser,
    config::Config,
    server::AuthServer,
};

#[derive(Parser, Debug)]
#[command(name = "notebook-oauth")]
#[command(about = "Scoped OAuth 2.0 authorization for the notebook MCP server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the authorization server
    Serve {
        /// Port to listen on
        #[arg(long, env = "MCP_NOTEBOOK_PORT")]
        port: Option<u16>,

        /// Public base URL (e.g. http://localhost:9000)
        #[arg(long, env = "MCP_NOTEBOOK_BASE_URL")]
        base_url: Option<String>,
    },

    /// Authorize through the browser and print the access token
    Authorize {
        /// Authorization server URL
        #[arg(long, env = "MCP_NOTEBOOK_BASE_URL")]
        server: Option<String>,

        /// Scope to request (repeatable)
        #[arg(long = "scope")]
        scopes: Vec<String>,

        /// Operation whose scopes to request (repeatable, e.g. --tool add_note)
        #[arg(long = "tool")]
        tools: Vec<String>,

        /// Loopback port for the redirect listener
        #[arg(long, env = "MCP_NOTEBOOK_CALLBACK_PORT")]
        callback_port: Option<u16>,

        /// Seconds to wait for the browser redirect
        #[arg(long, default_value = "300")]
        timeout: u64,
    },
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // stdout is reserved for the issued token.
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(layer.json()).init();
    } else {
        subscriber.with(layer.compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    let mut config = Config::from_env().context("Failed to load configuration")?;

    match cli.command {
        Command::Serve { port, base_url } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(base_url) = base_url {
                config.base_url = base_url;
            }
            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                port = config.port,
                "Starting notebook authorization server"
            );
            AuthServer::new(config).run_http().await
        }
        Command::Authorize {
            server,
            scopes,
            tools,
            callback_port,
            timeout,
        } => {
            if let Some(server) = server {
                config.base_url = server;
            }
            if let Some(port) = callback_port {
                config.callback_port = port;
            }
            config.callback_timeout = Duration::from_secs(timeout);
            run_authorize(&config, &requested_scopes(&scopes, &tools)).await
        }
    }
}

/// Explicit scopes plus the sorted union of the scopes the named tools require.
fn requested_scopes(scopes: &[String], tools: &[String]) -> Vec<String> {
    let mut requested: Vec<String> = scopes
        .iter()
        .flat_map(|s| s.split_whitespace())
        .map(str::to_string)
        .collect();
    for scope in ScopeTable::notebook().aggregate(tools) {
        if !requested.contains(&scope) {
            requested.push(scope);
        }
    }
    requested
}

async fn run_authorize(config: &Config, scopes: &[String]) -> anyhow::Result<()> {
    let client = OAuthClient::new(
        &config.base_url,
        config.resource_url.clone(),
        "Notebook OAuth CLI",
        InMemoryTokenStorage::new(),
    )?;

    let port = config.callback_port;
    let callback = CallbackServer::start(port)
        .await
        .with_context(|| format!("Failed to start callback listener on port {port}"))?;

    tracing::info!(
        scopes = ?scopes,
        redirect_uri = %callback.redirect_uri(),
        "Requesting authorization"
    );

    let result = client
        .authorize(&callback, scopes, config.callback_timeout, |url| async move {
            eprintln!("Open this URL in your browser to authorize:\n{url}");
            try_open_browser(&url);
        })
        .await;

    callback.stop().await;

    let token = result?;
    println!("{}", serde_json::to_string_pretty(&token)?);
    Ok(())
}
