//! Issuer Metadata Discovery
//!
//! Fetches the provider's discovery document, trying OpenID Connect
//! Discovery first and RFC 8414 (OAuth Authorization Server Metadata)
//! second.

use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;
use url::Url;

use crate::{Error, Result};

/// Well-known discovery paths, in the order they are tried
const DISCOVERY_PATHS: [&str; 2] = [
    "/.well-known/openid-configuration",
    "/.well-known/oauth-authorization-server",
];

/// Discovered provider endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerMetadata {
    /// Issuer identifier
    #[serde(default)]
    pub issuer: String,

    /// Authorization endpoint URL
    pub authorization_endpoint: String,

    /// Token endpoint URL
    pub token_endpoint: String,

    /// Token revocation endpoint (optional)
    #[serde(default)]
    pub revocation_endpoint: Option<String>,

    /// Supported grant types
    #[serde(default)]
    pub grant_types_supported: Vec<String>,

    /// Supported scopes (may be string or array due to implementation bugs)
    #[serde(default, deserialize_with = "deserialize_scopes")]
    pub scopes_supported: Vec<String>,

    /// Supported token endpoint auth methods
    #[serde(default)]
    pub token_endpoint_auth_methods_supported: Vec<String>,

    /// Supported PKCE code challenge methods
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
}

/// Deserialize scopes that may be either a string or array
fn deserialize_scopes<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    match StringOrVec::deserialize(deserializer)? {
        StringOrVec::String(s) => Ok(s.split_whitespace().map(String::from).collect()),
        StringOrVec::Vec(v) => Ok(v),
    }
}

impl IssuerMetadata {
    /// Discover issuer metadata from a base URL
    ///
    /// # Errors
    ///
    /// Returns [`Error::DiscoveryFailed`] when no discovery document can be
    /// fetched and parsed.
    pub async fn discover(client: &Client, base_url: &str) -> Result<Self> {
        let base = base_url.trim_end_matches('/');
        let mut last_error = String::new();

        for path in DISCOVERY_PATHS {
            let url = format!("{base}{path}");
            debug!(url = %url, "Discovering issuer metadata");

            match Self::fetch(client, &url).await {
                Ok(metadata) => {
                    debug!(issuer = %metadata.issuer, token_endpoint = %metadata.token_endpoint, "Discovered issuer");
                    return Ok(metadata);
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "Discovery document unavailable");
                    last_error = e;
                }
            }
        }

        Err(Error::DiscoveryFailed(format!("{base}: {last_error}")))
    }

    async fn fetch(client: &Client, url: &str) -> std::result::Result<Self, String> {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("failed to fetch metadata: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }

        response
            .json()
            .await
            .map_err(|e| format!("failed to parse metadata: {e}"))
    }

    /// Check if PKCE is supported (S256 method)
    #[must_use]
    pub fn supports_pkce(&self) -> bool {
        self.code_challenge_methods_supported
            .iter()
            .any(|m| m == "S256")
    }
}

/// Extract the base URL (scheme + host + port) from a full URL
pub fn base_url(url: &str) -> Result<String> {
    let parsed = Url::parse(url).map_err(|e| Error::InvalidHost(format!("{url}: {e}")))?;

    let host = parsed
        .host_str()
        .ok_or_else(|| Error::InvalidHost(format!("{url}: missing host")))?;
    let mut base = format!("{}://{host}", parsed.scheme());

    if let Some(port) = parsed.port() {
        use std::fmt::Write;
        let _ = write!(base, ":{port}");
    }

    Ok(base)
}

/// Validate an OAuth host: absolute http(s) URL with a host component
pub fn validate_host(host: &str) -> Result<Url> {
    let parsed = Url::parse(host).map_err(|e| Error::InvalidHost(format!("{host}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::InvalidHost(format!(
            "{host}: unsupported scheme '{}'",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(Error::InvalidHost(format!("{host}: missing host")));
    }
    Ok(parsed)
}
