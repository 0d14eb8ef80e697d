//! OAuth Session Library
//!
//! Desktop sign-in against an OAuth2 provider and a long-lived
//! authenticated session on top of it.
//!
//! # Features
//!
//! - **Authorization Code + PKCE**: loopback redirect, CSRF state, 60s deadline
//! - **Issuer Cache**: discovery metadata and client handles shared process-wide
//! - **Identity Reconstruction**: refresh with the exact client that signed in,
//!   even after a restart
//! - **Single-Flight Refresh**: concurrent 401s redeem the refresh token once
//! - **Resilient API Client**: transparent retry after reauthentication,
//!   response-shape normalization, eventual-consistency retry

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod oauth;
pub mod platform;
pub mod session;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level`. Logs go to stderr so command
/// output on stdout stays machine-readable.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        _ => subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    }
    .map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
