//! Process-wide issuer metadata and client handle cache
//!
//! Entries are keyed by the exact OAuth host string and live for the
//! lifetime of the process. Readers get an `Arc` snapshot, so an entry
//! overwritten mid-operation does not change what the caller already holds.
//! Writes are last-writer-wins.

use std::sync::Arc;

use dashmap::DashMap;
use reqwest::Client;
use tracing::debug;

use super::client::OAuthClient;
use super::metadata::IssuerMetadata;
use crate::Result;

/// Host-keyed cache shared by the sign-in flow and the refresh coordinator
#[derive(Debug)]
pub struct IssuerMetadataCache {
    /// HTTP client used for discovery and by cached client handles
    http_client: Client,
    /// `host -> discovered endpoints`
    issuers: DashMap<String, Arc<IssuerMetadata>>,
    /// `host -> client handle that last obtained tokens`
    clients: DashMap<String, Arc<OAuthClient>>,
}

impl IssuerMetadataCache {
    /// Create an empty cache
    #[must_use]
    pub fn new(http_client: Client) -> Self {
        Self {
            http_client,
            issuers: DashMap::new(),
            clients: DashMap::new(),
        }
    }

    /// HTTP client shared with handles built from this cache
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Return cached metadata for `host`, discovering it on a miss
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DiscoveryFailed`] when the discovery
    /// documents cannot be fetched.
    pub async fn discover(&self, host: &str) -> Result<Arc<IssuerMetadata>> {
        if let Some(cached) = self.cached_metadata(host) {
            debug!(host, "Issuer metadata cache hit");
            return Ok(cached);
        }

        let metadata = Arc::new(IssuerMetadata::discover(&self.http_client, host).await?);
        self.issuers.insert(host.to_string(), Arc::clone(&metadata));
        Ok(metadata)
    }

    /// Cached metadata for `host`, without discovery
    pub fn cached_metadata(&self, host: &str) -> Option<Arc<IssuerMetadata>> {
        self.issuers.get(host).map(|entry| Arc::clone(entry.value()))
    }

    /// Seed metadata for `host` (e.g. statically configured endpoints)
    pub fn insert_metadata(&self, host: &str, metadata: IssuerMetadata) -> Arc<IssuerMetadata> {
        let metadata = Arc::new(metadata);
        self.issuers.insert(host.to_string(), Arc::clone(&metadata));
        metadata
    }

    /// Cache the client handle that obtained tokens for `host`
    pub fn register_client(&self, host: &str, client: OAuthClient) -> Arc<OAuthClient> {
        debug!(host, client_id = %client.registration().client_id, "Caching OAuth client");
        let client = Arc::new(client);
        self.clients.insert(host.to_string(), Arc::clone(&client));
        client
    }

    /// Cached client handle for `host`
    pub fn client(&self, host: &str) -> Option<Arc<OAuthClient>> {
        self.clients.get(host).map(|entry| Arc::clone(entry.value()))
    }
}
