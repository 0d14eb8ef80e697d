//! Per-session authentication state machine
//!
//! ```text
//! UNAUTHENTICATED -> AUTHENTICATING -> AUTHENTICATED -> REFRESHING
//!        ^                 |                ^  |            |
//!        +---- failure ----+                |  +- sign out  |
//!        +--------------- refresh failure --+---------------+
//! ```

use std::fmt;

use parking_lot::RwLock;
use tracing::{debug, warn};

/// Authentication state of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No usable credentials
    Unauthenticated,
    /// Interactive sign-in in progress
    Authenticating,
    /// Credentials stored
    Authenticated,
    /// Refresh in flight after a 401 or expiry
    Refreshing,
}

impl SessionState {
    /// Whether `self -> to` is a legal edge
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        use SessionState::{Authenticated, Authenticating, Refreshing, Unauthenticated};
        matches!(
            (self, to),
            (Unauthenticated | Authenticated, Authenticating)
                | (Authenticating | Refreshing, Authenticated)
                | (Authenticating | Authenticated | Refreshing, Unauthenticated)
                | (Authenticated, Refreshing)
        ) || self == to
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Refreshing => "refreshing",
        })
    }
}

/// Thread-safe holder of the current [`SessionState`]
#[derive(Debug)]
pub struct SessionStateTracker {
    state: RwLock<SessionState>,
}

impl SessionStateTracker {
    /// Start in `initial`
    #[must_use]
    pub fn new(initial: SessionState) -> Self {
        Self {
            state: RwLock::new(initial),
        }
    }

    /// Current state
    pub fn current(&self) -> SessionState {
        *self.state.read()
    }

    /// Move to `to` if the edge is legal; returns whether the move happened
    pub fn transition(&self, to: SessionState) -> bool {
        Self::apply(&mut self.state.write(), to)
    }

    /// Claim `to` exclusively: fails with the current state if it already
    /// is `to`, otherwise transitions as [`transition`](Self::transition)
    /// does and returns the state left behind
    ///
    /// Check and move happen under one lock, so of two concurrent callers
    /// exactly one succeeds.
    pub fn begin(&self, to: SessionState) -> Result<SessionState, SessionState> {
        let mut state = self.state.write();
        let from = *state;
        if from == to {
            return Err(from);
        }
        Self::apply(&mut state, to);
        Ok(from)
    }

    fn apply(state: &mut SessionState, to: SessionState) -> bool {
        let from = *state;
        if from.can_transition_to(to) {
            if from != to {
                debug!(%from, %to, "Session state transition");
            }
            *state = to;
            true
        } else {
            warn!(%from, %to, "Ignoring illegal session state transition");
            false
        }
    }
}

impl Default for SessionStateTracker {
    fn default() -> Self {
        Self::new(SessionState::Unauthenticated)
    }
}
