//! Single-flight token refresh
//!
//! Providers may rotate or revoke a refresh token each time it is redeemed,
//! so two concurrent redemptions can invalidate each other. Every caller
//! that needs a new access token goes through [`RefreshGate`]: the first
//! starts the refresh, everyone arriving while it runs awaits the same
//! attempt and shares its outcome.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::state::{SessionState, SessionStateTracker};
use super::store::{self, SessionStore};
use crate::oauth::TokenRefreshCoordinator;
use crate::platform::UserNotifier;
use crate::{Error, Result};

/// New access token, or `None` when the session is gone
type RefreshOutcome = Option<String>;

type InFlight = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Coordinates refreshes for one session
pub struct RefreshGate {
    refresher: Arc<TokenRefreshCoordinator>,
    store: Arc<dyn SessionStore>,
    state: Arc<SessionStateTracker>,
    notifier: Arc<dyn UserNotifier>,
    oauth_host: String,
    client_id: String,
    in_flight: Mutex<Option<InFlight>>,
}

impl RefreshGate {
    /// Create a gate for the session stored in `store`
    pub fn new(
        refresher: Arc<TokenRefreshCoordinator>,
        store: Arc<dyn SessionStore>,
        state: Arc<SessionStateTracker>,
        notifier: Arc<dyn UserNotifier>,
        oauth_host: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            refresher,
            store,
            state,
            notifier,
            oauth_host: oauth_host.into(),
            client_id: client_id.into(),
            in_flight: Mutex::new(None),
        }
    }

    /// Session store behind this gate
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Session state tracker behind this gate
    pub fn state(&self) -> &Arc<SessionStateTracker> {
        &self.state
    }

    /// Obtain an access token newer than `rejected_token`
    ///
    /// Joins the in-flight refresh if there is one. If the stored token
    /// already differs from `rejected_token` (another caller refreshed
    /// first), it is returned without a network call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionExpired`] when no refresh token is stored or
    /// the refresh fails; stored tokens are cleared first.
    pub async fn refresh_after(self: &Arc<Self>, rejected_token: &str) -> Result<String> {
        let flight = {
            let mut slot = self.in_flight.lock();
            if let Some(existing) = slot.as_ref() {
                debug!("Joining in-flight token refresh");
                existing.clone()
            } else {
                let gate = Arc::clone(self);
                let rejected = rejected_token.to_string();
                let flight = async move {
                    let outcome = gate.run_refresh(&rejected).await;
                    gate.in_flight.lock().take();
                    outcome
                }
                .boxed()
                .shared();
                *slot = Some(flight.clone());
                flight
            }
        };

        flight.await.ok_or(Error::SessionExpired)
    }

    async fn run_refresh(&self, rejected_token: &str) -> RefreshOutcome {
        let pair = match store::load_token_pair(self.store.as_ref()).await {
            Ok(Some(pair)) => pair,
            Ok(None) => {
                warn!("No stored session to refresh");
                self.expire().await;
                return None;
            }
            Err(e) => {
                error!(error = %e, "Failed to load stored session");
                self.expire().await;
                return None;
            }
        };

        if !pair.access_token.is_empty() && pair.access_token != rejected_token && !pair.is_expired()
        {
            debug!("Stored access token already replaced; skipping refresh");
            return Some(pair.access_token);
        }

        if pair.refresh_token().is_none() {
            warn!("Stored session has no refresh token");
            self.expire().await;
            return None;
        }

        self.state.transition(SessionState::Refreshing);

        match self
            .refresher
            .refresh(&self.oauth_host, &self.client_id, &pair)
            .await
        {
            Ok(refreshed) => {
                if let Err(e) = store::save_token_pair(self.store.as_ref(), &refreshed).await {
                    error!(error = %e, "Failed to persist refreshed tokens");
                    self.notifier.error(&format!(
                        "Signed-in session was refreshed but could not be saved: {e}"
                    ));
                }
                self.state.transition(SessionState::Authenticated);
                info!("Session refreshed");
                Some(refreshed.access_token)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    requires_sign_in = e.requires_reauthentication(),
                    "Session refresh failed"
                );
                self.expire().await;
                None
            }
        }
    }

    /// Drop stored credentials so the next attempt starts a clean sign-in
    pub(crate) async fn expire(&self) {
        if let Err(e) = store::clear_tokens(self.store.as_ref()).await {
            error!(error = %e, "Failed to clear stored tokens");
            self.notifier
                .error(&format!("Could not remove expired credentials: {e}"));
        }
        self.state.transition(SessionState::Unauthenticated);
        self.notifier.info(&Error::SessionExpired.to_string());
    }
}
