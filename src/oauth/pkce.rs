//! PKCE (RFC 7636) verifier/challenge and CSRF state generation

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Unreserved characters permitted in a code verifier
const VERIFIER_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// Verifier length; RFC 7636 allows 43..=128
pub const VERIFIER_LEN: usize = 128;

/// Per-flow PKCE material. Never persisted; dropped once the flow ends.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// Secret sent only with the code exchange
    pub verifier: String,
    /// `BASE64URL(SHA256(verifier))`, sent with the authorization request
    pub challenge: String,
    /// CSRF nonce echoed back on the callback
    pub state: String,
}

impl PkceChallenge {
    /// Generate fresh verifier, challenge and state
    #[must_use]
    pub fn generate() -> Self {
        let verifier = generate_verifier();
        let challenge = challenge_for(&verifier);
        Self {
            verifier,
            challenge,
            state: generate_state(),
        }
    }

    /// Challenge method sent with the authorization request
    #[must_use]
    pub const fn method() -> &'static str {
        "S256"
    }
}

fn generate_verifier() -> String {
    let mut rng = rand::rng();
    (0..VERIFIER_LEN)
        .map(|_| char::from(VERIFIER_ALPHABET[rng.random_range(0..VERIFIER_ALPHABET.len())]))
        .collect()
}

/// S256 challenge for a verifier
#[must_use]
pub fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Generate a random state parameter
fn generate_state() -> String {
    let state_bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(state_bytes)
}
