//! Error types for OAuth session handling

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Why the token endpoint refused a refresh grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// `invalid_grant`: the refresh token was revoked, rotated away or never valid
    InvalidGrant,
    /// The refresh token (or the session behind it) has expired
    Expired,
    /// Any other provider error code
    Other(String),
}

impl RejectReason {
    /// Classify an OAuth error code plus optional description
    #[must_use]
    pub fn classify(code: &str, description: Option<&str>) -> Self {
        let expired = |s: &str| s.to_ascii_lowercase().contains("expired");
        match code {
            "invalid_grant" if description.is_some_and(expired) => Self::Expired,
            "invalid_grant" => Self::InvalidGrant,
            "expired_token" | "token_expired" => Self::Expired,
            other if expired(other) => Self::Expired,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidGrant => f.write_str("invalid_grant"),
            Self::Expired => f.write_str("expired"),
            Self::Other(code) => f.write_str(code),
        }
    }
}

/// OAuth session errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// OAuth host is not a well-formed http(s) URL
    #[error("Invalid OAuth host: {0}")]
    InvalidHost(String),

    /// Token pair cannot be used for the requested operation
    #[error("Invalid token pair: {0}")]
    InvalidTokenPair(String),

    /// Callback `state` did not match the one sent with the authorization request
    #[error("Authorization callback state mismatch - possible CSRF attempt")]
    StateMismatch,

    /// Callback arrived without an authorization code
    #[error("Authorization callback did not include a code")]
    MissingCode,

    /// No usable callback before the flow deadline
    #[error("Sign-in timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Loopback listener could not be bound
    #[error("Failed to bind callback listener: {0}")]
    PortBindFailed(String),

    /// Another interactive sign-in owns the loopback listener
    #[error("A sign-in is already in progress")]
    SignInInProgress,

    /// Authorization code exchange failed at the provider
    #[error("Token exchange failed: {}{}", .code.as_deref().unwrap_or("unknown_error"), .description.as_deref().map(|d| format!(" - {d}")).unwrap_or_default())]
    ExchangeFailed {
        /// Provider error code, if the provider sent one
        code: Option<String>,
        /// Provider error description or transport detail
        description: Option<String>,
    },

    /// Issuer metadata could not be discovered
    #[error("Issuer discovery failed: {0}")]
    DiscoveryFailed(String),

    /// No client identity could be built for a refresh
    #[error("Failed to create OAuth client: {0}")]
    ClientCreationFailed(String),

    /// Token endpoint refused a refresh grant
    #[error("Refresh rejected by provider: {0}")]
    ProviderRejected(RejectReason),

    /// Connection-level failure (DNS, refused, reset)
    #[error("Cannot reach {0}. Check your network connection and try again.")]
    Network(String),

    /// Non-success response from a wrapped API call
    #[error("API request failed: HTTP {status} - {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body (possibly truncated)
        body: String,
    },

    /// Stored credentials are gone or could not be refreshed; sign in again
    #[error("Your session has expired. Please sign in again.")]
    SessionExpired,

    /// Session store failure
    #[error("Session storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the only way forward is a fresh interactive sign-in
    #[must_use]
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            Self::SessionExpired
                | Self::ProviderRejected(RejectReason::InvalidGrant | RejectReason::Expired)
        )
    }

    /// True for transient failures a caller may retry
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout(),
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Map a transport error from an outbound call, keeping connection failures distinct
    pub(crate) fn from_transport(target: &str, error: reqwest::Error) -> Self {
        if error.is_connect() {
            Self::Network(target.to_string())
        } else {
            Self::Http(error)
        }
    }
}
