//! Session lifecycle: sign in, refresh, sign out

use std::sync::Arc;

use reqwest::Client;
use tracing::{error, info};

use super::refresh_gate::RefreshGate;
use super::state::{SessionState, SessionStateTracker};
use super::store::{self, SessionStore};
use crate::api::{ApiClientSettings, ResilientApiClient};
use crate::config::Config;
use crate::oauth::{
    AuthorizationFlowCoordinator, FlowSettings, IssuerMetadataCache, TokenPair,
    TokenRefreshCoordinator,
};
use crate::platform::{BrowserLauncher, UserNotifier};
use crate::{Error, Result};

/// One signed-in (or signing-in) session against one OAuth host
pub struct SessionManager {
    flow: AuthorizationFlowCoordinator,
    gate: Arc<RefreshGate>,
    http_client: Client,
    notifier: Arc<dyn UserNotifier>,
    oauth_host: String,
    client_id: String,
}

impl SessionManager {
    /// Build a session from configuration
    ///
    /// The issuer cache is shared between sign-in and refresh, so a refresh
    /// in the same process reuses the client handle that signed in. The
    /// initial state reflects whatever `store` already holds.
    pub async fn from_config(
        config: &Config,
        http_client: Client,
        store: Arc<dyn SessionStore>,
        browser: Arc<dyn BrowserLauncher>,
        notifier: Arc<dyn UserNotifier>,
    ) -> Result<Self> {
        let cache = Arc::new(IssuerMetadataCache::new(http_client.clone()));
        Self::with_cache(config, cache, store, browser, notifier).await
    }

    /// Build a session around an existing issuer cache
    pub async fn with_cache(
        config: &Config,
        cache: Arc<IssuerMetadataCache>,
        store: Arc<dyn SessionStore>,
        browser: Arc<dyn BrowserLauncher>,
        notifier: Arc<dyn UserNotifier>,
    ) -> Result<Self> {
        let initial = match store::load_token_pair(store.as_ref()).await? {
            Some(pair) if !pair.access_token.is_empty() || pair.refresh_token().is_some() => {
                SessionState::Authenticated
            }
            _ => SessionState::Unauthenticated,
        };
        let state = Arc::new(SessionStateTracker::new(initial));

        let flow = AuthorizationFlowCoordinator::new(
            Arc::clone(&cache),
            FlowSettings::from(&config.oauth),
            browser,
            Arc::clone(&notifier),
        );
        let refresher = Arc::new(TokenRefreshCoordinator::new(
            Arc::clone(&cache),
            config.oauth.callback_port,
        ));
        let gate = Arc::new(RefreshGate::new(
            refresher,
            store,
            state,
            Arc::clone(&notifier),
            config.oauth.host.clone(),
            config.oauth.client_id.clone(),
        ));

        Ok(Self {
            flow,
            gate,
            http_client: cache.http_client().clone(),
            notifier,
            oauth_host: config.oauth.host.clone(),
            client_id: config.oauth.client_id.clone(),
        })
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.gate.state().current()
    }

    /// Stored token pair, if any
    pub async fn current(&self) -> Result<Option<TokenPair>> {
        store::load_token_pair(self.gate.store().as_ref()).await
    }

    /// Run the interactive sign-in and persist the result
    ///
    /// A pair that cannot be persisted is still returned; the storage
    /// failure is reported through the notifier.
    pub async fn sign_in(&self) -> Result<TokenPair> {
        let state = self.gate.state();
        let previous = state
            .begin(SessionState::Authenticating)
            .map_err(|_| Error::SignInInProgress)?;

        match self.flow.sign_in(&self.oauth_host, &self.client_id).await {
            Ok(pair) => {
                if let Err(e) = store::save_token_pair(self.gate.store().as_ref(), &pair).await {
                    error!(error = %e, "Failed to persist tokens after sign-in");
                    self.notifier
                        .error(&format!("Signed in, but the session could not be saved: {e}"));
                }
                state.transition(SessionState::Authenticated);
                self.notifier.info("Signed in successfully.");
                Ok(pair)
            }
            Err(e) => {
                if !matches!(e, Error::SignInInProgress) {
                    state.transition(if previous == SessionState::Authenticated {
                        SessionState::Authenticated
                    } else {
                        SessionState::Unauthenticated
                    });
                }
                Err(e)
            }
        }
    }

    /// Force a refresh of the stored session
    pub async fn refresh(&self) -> Result<String> {
        let current = self.current().await?.ok_or(Error::SessionExpired)?;
        self.gate.refresh_after(&current.access_token).await
    }

    /// Remove stored credentials
    pub async fn sign_out(&self) -> Result<()> {
        store::clear_tokens(self.gate.store().as_ref()).await?;
        self.gate.state().transition(SessionState::Unauthenticated);
        info!(host = %self.oauth_host, "Signed out");
        Ok(())
    }

    /// API client that authenticates through this session
    pub fn api_client(&self, settings: ApiClientSettings) -> ResilientApiClient {
        ResilientApiClient::new(self.http_client.clone(), settings, Arc::clone(&self.gate))
    }
}
