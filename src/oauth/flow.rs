//! Interactive Authorization Code + PKCE sign-in
//!
//! One sign-in at a time owns the loopback listener. The whole flow
//! (discovery, browser round trip and code exchange) runs under a single
//! deadline; the listener is shut down on every exit path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};
use url::Url;

use super::cache::IssuerMetadataCache;
use super::callback::{CallbackReply, CallbackServer};
use super::client::{ClientRegistration, OAuthClient};
use super::metadata::{IssuerMetadata, validate_host};
use super::pkce::PkceChallenge;
use super::token::TokenPair;
use crate::config::OAuthConfig;
use crate::platform::{BrowserLauncher, UserNotifier};
use crate::{Error, Result};

/// Scopes requested when none are configured
pub const DEFAULT_SCOPES: [&str; 3] = ["openid", "offline", "offline_access"];

/// Default hard deadline for one sign-in
pub const DEFAULT_FLOW_TIMEOUT: Duration = Duration::from_secs(60);

/// Tunables for the interactive flow
#[derive(Debug, Clone)]
pub struct FlowSettings {
    /// Requested scopes, space-joined into the authorization request
    pub scopes: Vec<String>,
    /// Fixed loopback port; `None` lets the OS choose
    pub callback_port: Option<u16>,
    /// Deadline measured from flow start
    pub timeout: Duration,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            scopes: DEFAULT_SCOPES.iter().map(ToString::to_string).collect(),
            callback_port: None,
            timeout: DEFAULT_FLOW_TIMEOUT,
        }
    }
}

impl From<&OAuthConfig> for FlowSettings {
    fn from(config: &OAuthConfig) -> Self {
        Self {
            scopes: config.scopes.clone(),
            callback_port: config.callback_port,
            timeout: config.flow_timeout,
        }
    }
}

/// Drives interactive sign-in
pub struct AuthorizationFlowCoordinator {
    cache: Arc<IssuerMetadataCache>,
    settings: FlowSettings,
    browser: Arc<dyn BrowserLauncher>,
    notifier: Arc<dyn UserNotifier>,
    /// Held for the duration of a sign-in; guards the loopback port
    active: Mutex<()>,
}

impl AuthorizationFlowCoordinator {
    /// Create a coordinator
    pub fn new(
        cache: Arc<IssuerMetadataCache>,
        settings: FlowSettings,
        browser: Arc<dyn BrowserLauncher>,
        notifier: Arc<dyn UserNotifier>,
    ) -> Self {
        Self {
            cache,
            settings,
            browser,
            notifier,
            active: Mutex::new(()),
        }
    }

    /// Run one sign-in against `oauth_host` as `client_id`
    ///
    /// # Errors
    ///
    /// - [`Error::SignInInProgress`] if another sign-in holds the listener
    /// - [`Error::PortBindFailed`] if no loopback port can be bound
    /// - [`Error::StateMismatch`] / [`Error::MissingCode`] for a bad callback
    /// - [`Error::ExchangeFailed`] if the provider refuses the code
    /// - [`Error::Timeout`] if nothing completes before the deadline
    pub async fn sign_in(&self, oauth_host: &str, client_id: &str) -> Result<TokenPair> {
        let _active = self.active.try_lock().map_err(|_| Error::SignInInProgress)?;
        let deadline = Instant::now() + self.settings.timeout;

        validate_host(oauth_host)?;

        let metadata = timeout_at(deadline, self.cache.discover(oauth_host))
            .await
            .map_err(|_| Error::Timeout(self.settings.timeout))??;
        if !metadata.supports_pkce() && !metadata.code_challenge_methods_supported.is_empty() {
            warn!(host = oauth_host, "Issuer does not advertise S256 PKCE support");
        }

        let mut server = CallbackServer::bind(self.settings.callback_port).await?;

        let outcome = timeout_at(
            deadline,
            self.complete_flow(&mut server, oauth_host, client_id, metadata),
        )
        .await;

        server.shutdown().await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(host = oauth_host, timeout_secs = self.settings.timeout.as_secs(), "Sign-in timed out");
                Err(Error::Timeout(self.settings.timeout))
            }
        }
    }

    async fn complete_flow(
        &self,
        server: &mut CallbackServer,
        oauth_host: &str,
        client_id: &str,
        metadata: Arc<IssuerMetadata>,
    ) -> Result<TokenPair> {
        let redirect_uri = server.redirect_uri().to_string();
        let registration = ClientRegistration::public_client(client_id, redirect_uri.as_str());
        let client = OAuthClient::new(self.cache.http_client().clone(), metadata, registration)?;

        let pkce = PkceChallenge::generate();
        let auth_url = authorization_url(
            &client.metadata().authorization_endpoint,
            client_id,
            &redirect_uri,
            &pkce,
            &self.settings.scopes,
        )?;
        self.launch_browser(auth_url.as_str());

        let request = server.next_callback().await?;
        let code = request.params.validate(&pkce.state).map(str::to_string);
        let code = match code {
            Ok(code) => code,
            Err(e) => {
                warn!(error = %e, "Rejected OAuth callback");
                request.respond(CallbackReply::from_error(&e));
                return Err(e);
            }
        };

        debug!("Received authorization code");

        match client.exchange_code(&code, &pkce.verifier, &redirect_uri).await {
            Ok(pair) => {
                request.respond(CallbackReply::Success);
                self.cache.register_client(oauth_host, client);
                info!(host = oauth_host, "Sign-in complete");
                Ok(pair)
            }
            Err(e) => {
                warn!(error = %e, "Authorization code exchange failed");
                request.respond(CallbackReply::from_error(&e));
                Err(e)
            }
        }
    }

    fn launch_browser(&self, url: &str) {
        info!("Opening browser for authorization");
        if let Err(e) = self.browser.open(url) {
            warn!(error = %e, "Failed to open browser automatically");
            self.notifier.info(&format!(
                "Please sign in by visiting this URL in your browser:\n{url}"
            ));
        }
    }
}

/// Build the authorization request URL
///
/// # Errors
///
/// Returns [`Error::DiscoveryFailed`] if the discovered authorization
/// endpoint is not a valid URL.
pub fn authorization_url(
    authorization_endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    pkce: &PkceChallenge,
    scopes: &[String],
) -> Result<Url> {
    let mut url = Url::parse(authorization_endpoint).map_err(|e| {
        Error::DiscoveryFailed(format!("invalid authorization endpoint {authorization_endpoint}: {e}"))
    })?;

    {
        let mut params = url.query_pairs_mut();
        params.append_pair("response_type", "code");
        params.append_pair("client_id", client_id);
        params.append_pair("redirect_uri", redirect_uri);
        params.append_pair("state", &pkce.state);
        params.append_pair("code_challenge", &pkce.challenge);
        params.append_pair("code_challenge_method", PkceChallenge::method());

        if !scopes.is_empty() {
            params.append_pair("scope", &scopes.join(" "));
        }
    }

    Ok(url)
}
