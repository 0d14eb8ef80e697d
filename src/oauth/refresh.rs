//! Refresh-token redemption
//!
//! Providers only accept a refresh token from the client registration that
//! obtained it. The client is rebuilt in this order:
//!
//! 1. the live handle cached by a sign-in in this process, if its
//!    registration equals the one recorded on the token pair;
//! 2. the registration recorded on the token pair;
//! 3. a best-effort registration with a synthesized redirect URI. This one is
//!    unreliable: the OS-assigned port of the original sign-in cannot be
//!    reproduced, so the provider may reject it.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::cache::IssuerMetadataCache;
use super::callback::CALLBACK_PATH;
use super::client::{ClientRegistration, OAuthClient};
use super::metadata::{IssuerMetadata, validate_host};
use super::token::TokenPair;
use crate::{Error, Result};

/// Where the client identity for a refresh came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    /// Live handle cached by a sign-in in this process
    CachedClient,
    /// Registration persisted on the token pair
    PersistedRegistration,
    /// Synthesized; may not match what the provider expects
    Fallback,
}

impl IdentitySource {
    /// Whether the identity is known to match the original sign-in
    #[must_use]
    pub fn is_reliable(self) -> bool {
        !matches!(self, Self::Fallback)
    }
}

/// Exchanges refresh tokens for new token pairs
pub struct TokenRefreshCoordinator {
    cache: Arc<IssuerMetadataCache>,
    /// Fixed callback port, used when synthesizing a redirect URI
    callback_port: Option<u16>,
}

impl TokenRefreshCoordinator {
    /// Create a coordinator sharing `cache` with the sign-in flow
    pub fn new(cache: Arc<IssuerMetadataCache>, callback_port: Option<u16>) -> Self {
        Self {
            cache,
            callback_port,
        }
    }

    /// Redeem `token_pair`'s refresh token
    ///
    /// Host and token pair are validated before any network call. The
    /// returned pair carries the original redirect URI and client
    /// registration unchanged; if the provider does not rotate the refresh
    /// token, the old one is kept.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidHost`] / [`Error::InvalidTokenPair`] before any I/O
    /// - [`Error::DiscoveryFailed`] if issuer metadata is unavailable
    /// - [`Error::ClientCreationFailed`] if no client identity can be built
    /// - [`Error::ProviderRejected`] if the provider refuses the grant
    pub async fn refresh(
        &self,
        oauth_host: &str,
        client_id: &str,
        token_pair: &TokenPair,
    ) -> Result<TokenPair> {
        validate_host(oauth_host)?;
        let refresh_token = token_pair
            .refresh_token()
            .ok_or_else(|| Error::InvalidTokenPair("refresh_token is empty".to_string()))?;

        let metadata = self.cache.discover(oauth_host).await?;
        let (client, source) = self.resolve_client(oauth_host, client_id, token_pair, metadata)?;

        if source.is_reliable() {
            debug!(host = oauth_host, ?source, "Refreshing token");
        } else {
            warn!(
                host = oauth_host,
                redirect_uri = ?client.registration().redirect_uri(),
                "Refreshing with a reconstructed client identity; the provider may reject it"
            );
        }

        let refreshed = client.refresh(refresh_token).await.inspect_err(|e| {
            warn!(host = oauth_host, ?source, error = %e, "Token refresh failed");
        })?;

        let mut pair = refreshed.with_lineage_of(token_pair);
        if pair.refresh_token.is_none() {
            pair.refresh_token = Some(refresh_token.to_string());
        }

        if source == IdentitySource::PersistedRegistration {
            self.cache.register_client(oauth_host, (*client).clone());
        }

        info!(host = oauth_host, "Token refreshed successfully");
        Ok(pair)
    }

    /// Pick the client identity for a refresh of `token_pair`
    pub fn resolve_client(
        &self,
        oauth_host: &str,
        client_id: &str,
        token_pair: &TokenPair,
        metadata: Arc<IssuerMetadata>,
    ) -> Result<(Arc<OAuthClient>, IdentitySource)> {
        let cached = self.cache.client(oauth_host);

        if let Some(original) = &token_pair.original_client_metadata {
            if let Some(cached) = cached.filter(|c| c.registration() == original) {
                return Ok((cached, IdentitySource::CachedClient));
            }

            let client = OAuthClient::new(
                self.cache.http_client().clone(),
                metadata,
                original.clone(),
            )?;
            return Ok((Arc::new(client), IdentitySource::PersistedRegistration));
        }

        let redirect_uri = token_pair
            .original_redirect_uri
            .clone()
            .unwrap_or_else(|| self.synthesized_redirect_uri());
        let registration = ClientRegistration::public_client(client_id, redirect_uri);
        let client = OAuthClient::new(self.cache.http_client().clone(), metadata, registration)?;
        Ok((Arc::new(client), IdentitySource::Fallback))
    }

    fn synthesized_redirect_uri(&self) -> String {
        match self.callback_port {
            Some(port) => format!("http://127.0.0.1:{port}{CALLBACK_PATH}"),
            None => format!("http://127.0.0.1{CALLBACK_PATH}"),
        }
    }
}
