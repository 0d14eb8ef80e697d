//! OAuth 2.0 client side for desktop sign-in
//!
//! Implements the Authorization Code flow with PKCE (RFC 7636) over a
//! loopback redirect (RFC 8252), plus refresh-token redemption that keeps
//! the client identity stable across refreshes and process restarts.
//!
//! Features:
//! - Issuer metadata discovery (OpenID Connect Discovery / RFC 8414)
//! - Process-wide, host-keyed issuer and client cache
//! - Loopback callback server with CSRF state validation
//! - Token refresh with client identity reconstruction

pub mod cache;
pub mod callback;
pub mod client;
pub mod flow;
pub mod metadata;
pub mod pkce;
pub mod refresh;
pub mod token;

pub use cache::IssuerMetadataCache;
pub use client::{ClientRegistration, OAuthClient};
pub use flow::{AuthorizationFlowCoordinator, FlowSettings};
pub use metadata::IssuerMetadata;
pub use pkce::PkceChallenge;
pub use refresh::{IdentitySource, TokenRefreshCoordinator};
pub use token::TokenPair;
