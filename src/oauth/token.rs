//! Token pair model and token endpoint requests

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::client::ClientRegistration;

/// Access/refresh token pair plus the client identity that obtained it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    /// Access token
    pub access_token: String,

    /// Refresh token (optional)
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Granted scopes
    #[serde(default)]
    pub scope: Option<String>,

    /// Token expiration time (Unix timestamp)
    #[serde(default)]
    pub expires_at: Option<u64>,

    /// Redirect URI used by the sign-in that produced this token lineage
    #[serde(default)]
    pub original_redirect_uri: Option<String>,

    /// Exact client registration used by that sign-in
    #[serde(default)]
    pub original_client_metadata: Option<ClientRegistration>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl TokenPair {
    /// Build a pair from a token endpoint response
    pub(crate) fn from_response(response: TokenResponse) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.filter(|t| !t.is_empty()),
            token_type: response.token_type.unwrap_or_else(default_token_type),
            scope: response.scope,
            expires_at: response.expires_in.map(|secs| now_secs() + secs),
            original_redirect_uri: None,
            original_client_metadata: None,
        }
    }

    /// Refresh token, if present and non-empty
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }

    /// Check if the token is expired (with 60 second buffer)
    pub fn is_expired(&self) -> bool {
        // No expiry = doesn't expire
        self.expires_at
            .is_some_and(|expires_at| now_secs() + 60 >= expires_at)
    }

    /// Time until expiration
    pub fn time_until_expiry(&self) -> Option<Duration> {
        let now = now_secs();
        self.expires_at
            .filter(|expires_at| *expires_at > now)
            .map(|expires_at| Duration::from_secs(expires_at - now))
    }

    /// Carry the original sign-in identity over from a previous pair
    #[must_use]
    pub fn with_lineage_of(mut self, previous: &Self) -> Self {
        self.original_redirect_uri
            .clone_from(&previous.original_redirect_uri);
        self.original_client_metadata
            .clone_from(&previous.original_client_metadata);
        self
    }
}

/// OAuth token response
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

/// OAuth error response (RFC 6749 section 5.2)
#[derive(Debug, Default, Deserialize)]
struct TokenErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
}

/// Why a token endpoint request did not yield tokens
#[derive(Debug)]
pub(crate) enum TokenEndpointFailure {
    /// Request never completed
    Transport(reqwest::Error),
    /// Provider answered with a non-success status
    Rejected {
        status: u16,
        code: Option<String>,
        description: Option<String>,
    },
    /// Success status but unusable body
    Malformed(String),
}

/// POST a form-encoded grant to the token endpoint
pub(crate) async fn request_token(
    http_client: &Client,
    token_endpoint: &str,
    params: &[(&str, &str)],
) -> std::result::Result<TokenResponse, TokenEndpointFailure> {
    let grant_type = params
        .iter()
        .find_map(|(k, v)| (*k == "grant_type").then_some(*v))
        .unwrap_or_default();
    debug!(endpoint = %token_endpoint, grant_type, "Requesting token");

    let response = http_client
        .post(token_endpoint)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(params)
        .send()
        .await
        .map_err(TokenEndpointFailure::Transport)?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let parsed: TokenErrorResponse = serde_json::from_str(&body).unwrap_or_default();
        return Err(TokenEndpointFailure::Rejected {
            status: status.as_u16(),
            code: parsed.error,
            description: parsed.error_description.or_else(|| {
                let trimmed = body.trim();
                (!trimmed.is_empty()).then(|| trimmed.chars().take(200).collect())
            }),
        });
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| TokenEndpointFailure::Malformed(format!("failed to parse token response: {e}")))?;

    if token.access_token.is_empty() {
        return Err(TokenEndpointFailure::Malformed(
            "token response has an empty access_token".to_string(),
        ));
    }

    Ok(token)
}
