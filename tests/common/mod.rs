//! Shared fixtures: mock OAuth provider, scripted browser, recording notifier

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use oauth_session::oauth::{ClientRegistration, TokenPair};
use oauth_session::platform::{BrowserLauncher, UserNotifier};
use oauth_session::session::{MemorySessionStore, SessionStore};

pub const CLIENT_ID: &str = "app-client";
pub const TOKEN_PATH: &str = "/oauth2/token";
pub const OPENID_CONFIGURATION: &str = "/.well-known/openid-configuration";

/// Discovery document whose endpoints live on `base`
pub fn discovery_document(base: &str) -> Value {
    json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/oauth2/auth"),
        "token_endpoint": format!("{base}{TOKEN_PATH}"),
        "scopes_supported": "openid offline offline_access",
        "code_challenge_methods_supported": ["S256"],
        "token_endpoint_auth_methods_supported": ["none"]
    })
}

/// Provider answering OpenID discovery
pub async fn mock_provider() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(OPENID_CONFIGURATION))
        .respond_with(ResponseTemplate::new(200).set_body_json(discovery_document(&server.uri())))
        .mount(&server)
        .await;
    server
}

/// Successful token endpoint body
pub fn token_body(access: &str, refresh: Option<&str>) -> Value {
    let mut body = json!({
        "access_token": access,
        "token_type": "Bearer",
        "expires_in": 3600
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = json!(refresh);
    }
    body
}

/// Form fields of every POST the provider received at the token endpoint
pub async fn token_requests(server: &MockServer) -> Vec<HashMap<String, String>> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.method.as_str() == "POST" && r.url.path() == TOKEN_PATH)
        .map(|r| serde_urlencoded::from_bytes(&r.body).unwrap())
        .collect()
}

/// Signed-in pair with lineage recorded, as a sign-in would persist it
pub fn signed_in_pair(access: &str, refresh: Option<&str>) -> TokenPair {
    let redirect_uri = "http://127.0.0.1:53682/callback";
    TokenPair {
        access_token: access.to_string(),
        refresh_token: refresh.map(String::from),
        token_type: "Bearer".to_string(),
        scope: Some("openid offline".to_string()),
        expires_at: None,
        original_redirect_uri: Some(redirect_uri.to_string()),
        original_client_metadata: Some(ClientRegistration::public_client(CLIENT_ID, redirect_uri)),
    }
}

/// What the scripted browser sends back to the loopback listener
#[derive(Debug, Clone)]
pub enum BrowserAction {
    /// Redirect with `code` and the state from the authorization URL
    Approve(&'static str),
    /// Redirect with `code` and a forged state
    ForgeState(&'static str),
    /// Redirect with the right state but no code
    OmitCode,
    /// Redirect with an OAuth error
    Deny(&'static str),
    /// Do nothing; the user never finishes
    Ignore,
    /// Fail to launch
    FailToLaunch,
}

/// Browser stand-in that follows the authorization URL's redirect
pub struct ScriptedBrowser {
    action: BrowserAction,
    pub opened: Mutex<Vec<Url>>,
    pub redirect: Mutex<Option<JoinHandle<Option<u16>>>>,
}

impl ScriptedBrowser {
    pub fn new(action: BrowserAction) -> Arc<Self> {
        Arc::new(Self {
            action,
            opened: Mutex::new(Vec::new()),
            redirect: Mutex::new(None),
        })
    }

    /// Authorization URL opened last
    pub fn last_url(&self) -> Url {
        self.opened.lock().last().cloned().unwrap()
    }

    /// HTTP status the loopback page answered with
    pub async fn page_status(&self) -> Option<u16> {
        let handle = self.redirect.lock().take()?;
        handle.await.ok().flatten()
    }
}

impl BrowserLauncher for ScriptedBrowser {
    fn open(&self, url: &str) -> std::io::Result<()> {
        let parsed = Url::parse(url).map_err(std::io::Error::other)?;
        self.opened.lock().push(parsed.clone());

        let query: HashMap<String, String> = parsed.query_pairs().into_owned().collect();
        let state = query.get("state").cloned().unwrap_or_default();
        let mut callback = Url::parse(&query["redirect_uri"]).map_err(std::io::Error::other)?;

        match &self.action {
            BrowserAction::Approve(code) => {
                callback
                    .query_pairs_mut()
                    .append_pair("code", code)
                    .append_pair("state", &state);
            }
            BrowserAction::ForgeState(code) => {
                callback
                    .query_pairs_mut()
                    .append_pair("code", code)
                    .append_pair("state", "forged-state");
            }
            BrowserAction::OmitCode => {
                callback.query_pairs_mut().append_pair("state", &state);
            }
            BrowserAction::Deny(error) => {
                callback
                    .query_pairs_mut()
                    .append_pair("error", error)
                    .append_pair("error_description", "The user denied the request")
                    .append_pair("state", &state);
            }
            BrowserAction::Ignore => return Ok(()),
            BrowserAction::FailToLaunch => {
                return Err(std::io::Error::other("no browser available"));
            }
        }

        let handle = tokio::spawn(async move {
            reqwest::get(callback.as_str())
                .await
                .ok()
                .map(|r| r.status().as_u16())
        });
        *self.redirect.lock() = Some(handle);
        Ok(())
    }
}

/// Notifier that records every message
#[derive(Default)]
pub struct RecordingNotifier {
    pub infos: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl UserNotifier for RecordingNotifier {
    fn info(&self, message: &str) {
        self.infos.lock().push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.errors.lock().push(message.to_string());
    }
}

/// Memory store whose writes can be switched to fail (full disk, locked keychain)
#[derive(Default)]
pub struct FailingWritesStore {
    pub inner: MemorySessionStore,
    fail_writes: AtomicBool,
}

impl FailingWritesStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionStore for FailingWritesStore {
    async fn get(&self, key: &str) -> oauth_session::Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> oauth_session::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(oauth_session::Error::Storage(format!("{key}: disk full")));
        }
        self.inner.set(key, value).await
    }

    async fn clear(&self, key: &str) -> oauth_session::Result<()> {
        self.inner.clear(key).await
    }
}

/// A loopback port nothing is listening on
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
