//! OAuth Client
//!
//! A client handle binds one [`ClientRegistration`] to one issuer's
//! endpoints. The provider only honours a refresh token when it is redeemed
//! by the same registration that obtained it, so handles are cached and the
//! registration is persisted alongside every token pair.

use std::sync::Arc;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::metadata::IssuerMetadata;
use super::token::{self, TokenEndpointFailure, TokenPair};
use crate::error::RejectReason;
use crate::{Error, Result};

/// Client registration used for every grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRegistration {
    /// OAuth client identifier
    pub client_id: String,

    /// Registered redirect URIs
    #[serde(default)]
    pub redirect_uris: Vec<String>,

    /// Registered response types
    #[serde(default = "default_response_types")]
    pub response_types: Vec<String>,

    /// Token endpoint auth method (public desktop clients use `none`)
    #[serde(default = "default_auth_method")]
    pub token_endpoint_auth_method: String,
}

fn default_response_types() -> Vec<String> {
    vec!["code".to_string()]
}

fn default_auth_method() -> String {
    "none".to_string()
}

impl ClientRegistration {
    /// Registration for a public (secretless) client with one redirect URI
    pub fn public_client(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uris: vec![redirect_uri.into()],
            response_types: default_response_types(),
            token_endpoint_auth_method: default_auth_method(),
        }
    }

    /// First registered redirect URI
    pub fn redirect_uri(&self) -> Option<&str> {
        self.redirect_uris.first().map(String::as_str)
    }
}

/// Live client handle for one issuer
#[derive(Debug, Clone)]
pub struct OAuthClient {
    /// HTTP client for token requests
    http_client: Client,

    /// Issuer endpoints
    metadata: Arc<IssuerMetadata>,

    /// Registration sent with every grant
    registration: ClientRegistration,
}

impl OAuthClient {
    /// Create a client handle
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClientCreationFailed`] if the registration has no
    /// client id or the issuer has no token endpoint.
    pub fn new(
        http_client: Client,
        metadata: Arc<IssuerMetadata>,
        registration: ClientRegistration,
    ) -> Result<Self> {
        if registration.client_id.trim().is_empty() {
            return Err(Error::ClientCreationFailed(
                "client registration has an empty client_id".to_string(),
            ));
        }
        if metadata.token_endpoint.is_empty() {
            return Err(Error::ClientCreationFailed(
                "issuer metadata has no token endpoint".to_string(),
            ));
        }
        Ok(Self {
            http_client,
            metadata,
            registration,
        })
    }

    /// Registration bound to this handle
    pub fn registration(&self) -> &ClientRegistration {
        &self.registration
    }

    /// Issuer endpoints bound to this handle
    pub fn metadata(&self) -> &IssuerMetadata {
        &self.metadata
    }

    /// Exchange an authorization code for tokens
    ///
    /// The returned pair records the redirect URI and registration used, so a
    /// later refresh can present the identical client identity.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenPair> {
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.registration.client_id.as_str()),
            ("code", code),
            ("code_verifier", code_verifier),
            ("redirect_uri", redirect_uri),
        ];

        let response = token::request_token(&self.http_client, &self.metadata.token_endpoint, &params)
            .await
            .map_err(|failure| match failure {
                TokenEndpointFailure::Transport(e) => Error::ExchangeFailed {
                    code: None,
                    description: Some(format!("token request failed: {e}")),
                },
                TokenEndpointFailure::Rejected {
                    status,
                    code,
                    description,
                } => Error::ExchangeFailed {
                    code,
                    description: description.or_else(|| Some(format!("HTTP {status}"))),
                },
                TokenEndpointFailure::Malformed(detail) => Error::ExchangeFailed {
                    code: None,
                    description: Some(detail),
                },
            })?;

        let mut pair = TokenPair::from_response(response);
        pair.original_redirect_uri = Some(redirect_uri.to_string());
        pair.original_client_metadata = Some(self.registration.clone());

        info!(client_id = %self.registration.client_id, "Authorization code exchanged");
        Ok(pair)
    }

    /// Redeem a refresh token
    ///
    /// Rejections are classified into [`RejectReason`]; `invalid_grant` and
    /// expiry are terminal for the session.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.registration.client_id.as_str()),
            ("refresh_token", refresh_token),
        ];

        let response = token::request_token(&self.http_client, &self.metadata.token_endpoint, &params)
            .await
            .map_err(|failure| match failure {
                TokenEndpointFailure::Transport(e) => {
                    Error::from_transport(&self.metadata.token_endpoint, e)
                }
                TokenEndpointFailure::Rejected {
                    status,
                    code: Some(code),
                    description,
                } => {
                    debug!(status, code = %code, "Refresh rejected");
                    Error::ProviderRejected(RejectReason::classify(&code, description.as_deref()))
                }
                TokenEndpointFailure::Rejected { status, .. } => {
                    Error::ProviderRejected(RejectReason::Other(format!("http_{status}")))
                }
                TokenEndpointFailure::Malformed(detail) => Error::Internal(detail),
            })?;

        Ok(TokenPair::from_response(response))
    }
}
