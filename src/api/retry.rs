//! Bounded retry for eventually-consistent list reads
//!
//! Some reads race the server's own replication, e.g. listing a resource
//! right after creating it. An empty result is retried with a linear delay
//! (`attempt * step`). Errors are not retried here.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::Result;
use crate::config::RetryConfig;

/// Linear back-off policy for empty results
#[derive(Debug, Clone, Copy)]
pub struct ConsistencyRetryPolicy {
    /// Maximum attempts, including the first
    pub max_attempts: u32,
    /// Delay unit; attempt `n` waits `n * step` before the next try
    pub step: Duration,
}

impl ConsistencyRetryPolicy {
    /// Create from config
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            step: config.step,
        }
    }

    /// Delay after the `attempt`-th (1-based) empty result
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.step * attempt
    }
}

impl Default for ConsistencyRetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

/// Run `f` until it yields a non-empty list or attempts run out
///
/// A list that is still empty after the last attempt is returned as is; it
/// may be genuinely empty.
pub async fn retry_while_empty<F, Fut, T>(
    policy: &ConsistencyRetryPolicy,
    name: &str,
    mut f: F,
) -> Result<Vec<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let items = f().await?;

        if !items.is_empty() {
            return Ok(items);
        }

        if attempts >= policy.max_attempts {
            debug!(operation = name, attempts, "Result still empty after max attempts");
            return Ok(items);
        }

        let delay = policy.delay(attempts);
        debug!(
            operation = name,
            attempt = attempts,
            delay_ms = delay.as_millis(),
            "Empty result, retrying after delay"
        );
        sleep(delay).await;
    }
}
