//! Authenticated REST access
//!
//! - `client`: bearer-token requests with 401 recovery
//! - `normalize`: list-shape normalization
//! - `retry`: eventual-consistency retry for list reads

mod client;
pub mod normalize;
pub mod retry;

pub use client::{ApiClientSettings, ResilientApiClient};
pub use normalize::{into_entities, normalize_entities};
pub use retry::{ConsistencyRetryPolicy, retry_while_empty};
