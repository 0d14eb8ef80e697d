//! Resilient API Client
//!
//! Wraps outbound REST calls with the session's bearer token. A 401 sends
//! the session through the single-flight [`RefreshGate`] and the request is
//! retried exactly once with the new token. Connection failures surface as
//! [`Error::Network`] and are not retried here.

use std::sync::Arc;

use reqwest::header::ACCEPT;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::normalize::into_entities;
use super::retry::{ConsistencyRetryPolicy, retry_while_empty};
use crate::config::Config;
use crate::oauth::metadata;
use crate::session::RefreshGate;
use crate::session::store;
use crate::{Error, Result};

/// Longest error body kept in [`Error::Api`]
const MAX_ERROR_BODY: usize = 512;

/// Settings for [`ResilientApiClient`]
#[derive(Debug, Clone)]
pub struct ApiClientSettings {
    /// Base URL that request paths are joined to
    pub base_url: String,
    /// Policy for eventually-consistent list reads
    pub consistency: ConsistencyRetryPolicy,
}

impl From<&Config> for ApiClientSettings {
    fn from(config: &Config) -> Self {
        Self {
            base_url: config.api.base_url.clone(),
            consistency: ConsistencyRetryPolicy::new(&config.retry),
        }
    }
}

/// Authenticated API client for one session
pub struct ResilientApiClient {
    http_client: Client,
    base_url: String,
    consistency: ConsistencyRetryPolicy,
    gate: Arc<RefreshGate>,
}

impl ResilientApiClient {
    /// Create a client authenticating through `gate`
    pub fn new(http_client: Client, settings: ApiClientSettings, gate: Arc<RefreshGate>) -> Self {
        Self {
            http_client,
            base_url: settings.base_url,
            consistency: settings.consistency,
            gate,
        }
    }

    /// `GET path`
    pub async fn get(&self, path: &str) -> Result<Value> {
        self.execute(Method::GET, path, None).await
    }

    /// `POST path` with a JSON body
    pub async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        self.execute(Method::POST, path, Some(body)).await
    }

    /// `PUT path` with a JSON body
    pub async fn put(&self, path: &str, body: &Value) -> Result<Value> {
        self.execute(Method::PUT, path, Some(body)).await
    }

    /// `DELETE path`
    pub async fn delete(&self, path: &str) -> Result<Value> {
        self.execute(Method::DELETE, path, None).await
    }

    /// `GET path` and normalize the response into a list of entities
    pub async fn list<T: DeserializeOwned>(
        &self,
        path: &str,
        collection_field: Option<&str>,
    ) -> Result<Vec<T>> {
        let value = self.get(path).await?;
        into_entities(value, collection_field)
    }

    /// Like [`Self::list`], retrying while the result is unexpectedly empty
    pub async fn list_awaiting_consistency<T: DeserializeOwned>(
        &self,
        path: &str,
        collection_field: Option<&str>,
    ) -> Result<Vec<T>> {
        retry_while_empty(&self.consistency, path, || self.list(path, collection_field)).await
    }

    /// Send a request with the session's bearer token
    ///
    /// # Errors
    ///
    /// - [`Error::Network`] when the API is unreachable
    /// - [`Error::SessionExpired`] when reauthentication fails
    /// - [`Error::Api`] for any other non-success status
    pub async fn execute(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = self.url(path);
        let token = self.access_token().await?;

        let response = self.send(&method, &url, body, &token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return read_json(response).await;
        }

        debug!(%method, url = %url, "Received 401, reauthenticating");
        let token = self.gate.refresh_after(&token).await?;

        let retried = self.send(&method, &url, body, &token).await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            warn!(%method, url = %url, "Still unauthorized after refresh");
            self.gate.expire().await;
            return Err(Error::SessionExpired);
        }
        read_json(retried).await
    }

    /// Current access token, refreshed first if it is missing or expired
    async fn access_token(&self) -> Result<String> {
        let pair = store::load_token_pair(self.gate.store().as_ref())
            .await?
            .ok_or(Error::SessionExpired)?;

        let stale = pair.access_token.is_empty() || pair.is_expired();
        if stale && pair.refresh_token().is_some() {
            debug!("Stored access token is stale, refreshing before request");
            return self.gate.refresh_after(&pair.access_token).await;
        }
        if pair.access_token.is_empty() {
            return Err(Error::SessionExpired);
        }
        Ok(pair.access_token)
    }

    async fn send(
        &self,
        method: &Method,
        url: &str,
        body: Option<&Value>,
        token: &str,
    ) -> Result<Response> {
        let mut request = self
            .http_client
            .request(method.clone(), url)
            .bearer_auth(token)
            .header(ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        request.send().await.map_err(|e| {
            let target = metadata::base_url(&self.base_url).unwrap_or_else(|_| self.base_url.clone());
            Error::from_transport(&target, e)
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

async fn read_json(response: Response) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Api {
            status: status.as_u16(),
            body: body.chars().take(MAX_ERROR_BODY).collect(),
        });
    }

    let bytes = response.bytes().await?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(&bytes)?)
}
