//! Loopback listener that captures the authorization redirect.
//!
//! The listener runs on its own task and writes whatever arrives at
//! `/callback` into a single slot; the flow polls that slot.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

use crate::config::oauth::CALLBACK_POLL_INTERVAL;
use crate::error::CallbackError;
use crate::server::oauth::login::html_escape;

/// Last redirect received. Code and state are always written together.
#[derive(Debug, Default)]
struct CallbackSlot {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

type SharedSlot = Arc<Mutex<CallbackSlot>>;

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// A running callback listener.
///
/// Dropping it signals the listener to shut down.
#[derive(Debug)]
pub struct CallbackServer {
    addr: SocketAddr,
    slot: SharedSlot,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl CallbackServer {
    /// Bind `127.0.0.1:<port>` and start serving. Port 0 picks a free port.
    ///
    /// # Errors
    ///
    /// Returns [`CallbackError::Bind`] if the port cannot be bound.
    pub async fn start(port: u16) -> Result<Self, CallbackError> {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))).await?;
        let addr = listener.local_addr()?;

        let slot = SharedSlot::default();
        let app = Router::new()
            .route("/callback", get(handle_callback))
            .fallback(|| async { (StatusCode::NOT_FOUND, "Not found") })
            .with_state(Arc::clone(&slot));

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                tracing::error!(error = %e, "Callback listener failed");
            }
        });

        tracing::info!(%addr, "Callback listener started");

        Ok(Self {
            addr,
            slot,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Address actually bound.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Redirect URI to register and send with the authorization request.
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/callback", self.addr.port())
    }

    /// Discard any outcome left over from an earlier redirect.
    pub async fn reset(&self) {
        *self.slot.lock().await = CallbackSlot::default();
    }

    /// Wait for the next redirect.
    ///
    /// Clears the slot first, so only a redirect arriving after this call is
    /// observed. Returns the code and the state that came with it.
    ///
    /// # Errors
    ///
    /// - [`CallbackError::Authorization`] if the redirect carried `error`
    /// - [`CallbackError::Timeout`] if nothing arrived within `timeout`
    pub async fn wait_for_callback(
        &self,
        timeout: Duration,
    ) -> Result<(String, Option<String>), CallbackError> {
        self.reset().await;
        let started = Instant::now();

        loop {
            {
                let mut slot = self.slot.lock().await;
                if let Some(code) = slot.code.take() {
                    return Ok((code, slot.state.take()));
                }
                if let Some(error) = slot.error.take() {
                    return Err(CallbackError::Authorization(error));
                }
            }

            if started.elapsed() >= timeout {
                return Err(CallbackError::Timeout(timeout));
            }
            tokio::time::sleep(CALLBACK_POLL_INTERVAL).await;
        }
    }

    /// Shut the listener down and wait for its task to finish.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Callback listener task did not exit cleanly");
            }
        }
        tracing::info!(addr = %self.addr, "Callback listener stopped");
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn handle_callback(
    State(slot): State<SharedSlot>,
    Query(params): Query<CallbackParams>,
) -> Response {
    // Blank values are treated as missing.
    if let Some(code) = params.code.filter(|c| !c.is_empty()) {
        let mut slot = slot.lock().await;
        slot.code = Some(code);
        slot.state = params.state;
        slot.error = None;
        tracing::debug!("Captured authorization code");
        return Html(SUCCESS_PAGE).into_response();
    }

    if let Some(error) = params.error.filter(|e| !e.is_empty()) {
        let page = failure_page(&error);
        let mut slot = slot.lock().await;
        slot.code = None;
        slot.state = None;
        slot.error = Some(error);
        return (StatusCode::BAD_REQUEST, Html(page)).into_response();
    }

    (StatusCode::NOT_FOUND, "Not found").into_response()
}

const SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Authorization Successful</title></head>
<body style="font-family:sans-serif;text-align:center;padding-top:60px">
<h1>Authorization Successful!</h1>
<p>You can close this window and return to the terminal.</p>
<script>setTimeout(function(){ window.close(); }, 2000);</script>
</body>
</html>"#;

fn failure_page(error: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Authorization Failed</title></head>
<body style="font-family:sans-serif;text-align:center;padding-top:60px">
<h1>Authorization Failed</h1>
<p>Error: {}</p>
<p>You can close this window and return to the terminal.</p>
</body>
</html>"#,
        html_escape(error)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_page_escapes_error() {
        let page = failure_page("<bad>");
        assert!(page.contains("&lt;bad&gt;"));
        assert!(!page.contains("<bad>"));
    }

    #[tokio::test]
    async fn test_ephemeral_port_and_redirect_uri() {
        let server = CallbackServer::start(0).await.unwrap();
        let port = server.local_addr().port();
        assert_ne!(port, 0);
        let expected = format!("http://localhost:{port}/callback");
        assert_eq!(server.redirect_uri(), expected);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_wait_returns_outcome_written_during_wait() {
        let server = CallbackServer::start(0).await.unwrap();
        let slot = Arc::clone(&server.slot);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let mut slot = slot.lock().await;
            slot.code = Some("mcp_code".into());
            slot.state = Some("s1".into());
        });

        let timeout = Duration::from_secs(2);
        let (code, state) = server.wait_for_callback(timeout).await.unwrap();
        assert_eq!(code, "mcp_code");
        assert_eq!(state.as_deref(), Some("s1"));
        server.stop().await;
    }
}
