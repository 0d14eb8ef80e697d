//! OAuth Callback Server
//!
//! A short-lived loopback HTTP server that catches the browser redirect
//! carrying the authorization code. The first request to `/callback`
//! resolves the flow; anything after that gets a 404. The flow answers the
//! browser through a reply channel once the code exchange has finished, so
//! the page shown reflects the real outcome.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use parking_lot::Mutex;
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Path the provider redirects to
pub const CALLBACK_PATH: &str = "/callback";

/// OAuth callback query parameters
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,

    /// State parameter (for CSRF protection)
    pub state: Option<String>,

    /// Error code
    pub error: Option<String>,

    /// Error description
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Validate the callback against the state sent with the authorization
    /// request and return the authorization code.
    ///
    /// A present-but-different state always wins over every other problem,
    /// so a forged callback can never reach the code exchange.
    pub fn validate(&self, expected_state: &str) -> Result<&str> {
        let state_matches = |received: &str| -> bool {
            received.as_bytes().ct_eq(expected_state.as_bytes()).into()
        };

        if let Some(received) = self.state.as_deref() {
            if !state_matches(received) {
                return Err(Error::StateMismatch);
            }
        }

        if let Some(error) = &self.error {
            return Err(Error::ExchangeFailed {
                code: Some(error.clone()),
                description: self.error_description.clone(),
            });
        }

        let code = self
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or(Error::MissingCode)?;

        if self.state.is_none() {
            return Err(Error::StateMismatch);
        }

        Ok(code)
    }
}

/// How the browser should be answered
#[derive(Debug)]
pub enum CallbackReply {
    /// Sign-in completed
    Success,
    /// Sign-in failed; shown to the user
    Failure {
        /// Short error code
        error: String,
        /// Human readable description
        description: String,
    },
}

impl CallbackReply {
    /// Failure reply describing `error`
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        let code = match error {
            Error::StateMismatch => "state_mismatch",
            Error::MissingCode => "missing_code",
            Error::ExchangeFailed { code: Some(code), .. } => code.as_str(),
            Error::ExchangeFailed { .. } => "exchange_failed",
            _ => "sign_in_failed",
        };
        Self::Failure {
            error: code.to_string(),
            description: error.to_string(),
        }
    }
}

/// The first request that reached the callback path
#[derive(Debug)]
pub struct CallbackRequest {
    /// Query parameters as received
    pub params: CallbackParams,
    /// Answer for the waiting browser request
    reply: oneshot::Sender<CallbackReply>,
}

impl CallbackRequest {
    /// Answer the browser. Ignored if the browser already disconnected.
    pub fn respond(self, reply: CallbackReply) {
        let _ = self.reply.send(reply);
    }
}

type Slot = Arc<Mutex<Option<oneshot::Sender<CallbackRequest>>>>;

/// Running loopback listener. Stops when shut down or dropped.
#[derive(Debug)]
pub struct CallbackServer {
    port: u16,
    redirect_uri: String,
    rx: Option<oneshot::Receiver<CallbackRequest>>,
    server: Option<JoinHandle<()>>,
}

impl CallbackServer {
    /// Bind the listener on 127.0.0.1
    ///
    /// Uses `preferred_port` when given; if that port is already in use,
    /// falls back to an OS-assigned port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PortBindFailed`] when no port can be bound.
    pub async fn bind(preferred_port: Option<u16>) -> Result<Self> {
        let listener = bind_listener(preferred_port).await?;
        let port = listener
            .local_addr()
            .map_err(|e| Error::PortBindFailed(format!("failed to read local address: {e}")))?
            .port();

        let redirect_uri = format!("http://127.0.0.1:{port}{CALLBACK_PATH}");
        info!(url = %redirect_uri, "OAuth callback server listening");

        let (tx, rx) = oneshot::channel();
        let slot: Slot = Arc::new(Mutex::new(Some(tx)));

        let app = Router::new()
            .route(CALLBACK_PATH, get(handle_callback).options(handle_preflight))
            .layer(TraceLayer::new_for_http())
            .with_state(slot);

        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!(error = %e, "Callback server error");
            }
        });

        Ok(Self {
            port,
            redirect_uri,
            rx: Some(rx),
            server: Some(server),
        })
    }

    /// Port actually bound
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Redirect URI derived from the bound port
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Wait for the first request to the callback path
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if called twice or if the server stopped
    /// before a callback arrived.
    pub async fn next_callback(&mut self) -> Result<CallbackRequest> {
        let rx = self
            .rx
            .take()
            .ok_or_else(|| Error::Internal("callback already consumed".to_string()))?;
        rx.await
            .map_err(|_| Error::Internal("Callback channel closed unexpectedly".to_string()))
    }

    /// Stop the listener and wait until the port is released
    pub async fn shutdown(mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
            let _ = server.await;
            debug!(port = self.port, "OAuth callback server stopped");
        }
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

async fn bind_listener(preferred_port: Option<u16>) -> Result<TcpListener> {
    let loopback = |port| SocketAddr::from((Ipv4Addr::LOCALHOST, port));

    if let Some(port) = preferred_port.filter(|p| *p != 0) {
        match TcpListener::bind(loopback(port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                warn!(port, "Configured callback port in use, falling back to an OS-assigned port");
            }
            Err(e) => {
                return Err(Error::PortBindFailed(format!("127.0.0.1:{port}: {e}")));
            }
        }
    }

    TcpListener::bind(loopback(0))
        .await
        .map_err(|e| Error::PortBindFailed(format!("127.0.0.1:0: {e}")))
}

/// Handle the OAuth callback
async fn handle_callback(
    State(slot): State<Slot>,
    Query(params): Query<CallbackParams>,
) -> Response {
    debug!(
        has_code = params.code.is_some(),
        has_state = params.state.is_some(),
        error = ?params.error,
        "Received OAuth callback"
    );

    let Some(tx) = slot.lock().take() else {
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    if tx
        .send(CallbackRequest {
            params,
            reply: reply_tx,
        })
        .is_err()
    {
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    }

    let (status, page) = match reply_rx.await {
        Ok(CallbackReply::Success) => (StatusCode::OK, success_page()),
        Ok(CallbackReply::Failure { error, description }) => {
            (StatusCode::BAD_REQUEST, error_page(&error, &description))
        }
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            error_page("cancelled", "Sign-in was cancelled or timed out."),
        ),
    };

    let mut response = (status, Html(page)).into_response();
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

/// Answer CORS preflight requests permissively
async fn handle_preflight() -> impl IntoResponse {
    (
        StatusCode::OK,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, OPTIONS"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "*"),
            (header::ACCESS_CONTROL_MAX_AGE, "600"),
        ],
    )
}

fn success_page() -> String {
    r#"<!DOCTYPE html>
<html>
<head>
    <title>Signed In</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            background: #1e6f5c;
            color: white;
        }
        .container { text-align: center; padding: 2rem; }
        h1 { margin: 0 0 0.5rem 0; }
        p { margin: 0; opacity: 0.9; }
    </style>
</head>
<body>
    <div class="container">
        <h1>Signed in successfully</h1>
        <p>You can close this window and return to the application.</p>
    </div>
    <script>setTimeout(() => window.close(), 3000);</script>
</body>
</html>"#
        .to_string()
}

fn error_page(error: &str, description: &str) -> String {
    let error = escape_html(error);
    let description = escape_html(description);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Sign-in Failed</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            background: #a8322d;
            color: white;
        }}
        .container {{ text-align: center; padding: 2rem; max-width: 420px; }}
        h1 {{ margin: 0 0 0.5rem 0; }}
        .error-code {{ font-family: monospace; margin-top: 1rem; opacity: 0.7; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>Sign-in failed</h1>
        <p>{description}</p>
        <p class="error-code">Error: {error}</p>
    </div>
</body>
</html>"#
    )
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
