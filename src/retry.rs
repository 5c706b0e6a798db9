// Bounded retry for transient upstream failures.
// Only calls explicitly marked idempotent carry a policy with more than one attempt.

use std::future::Future;
use std::time::Duration;
use tracing::{error, info};

use crate::client::UpstreamError;
use crate::observability::record_retry;

/// Upper bound on attempts for any retried call
pub const MAX_ATTEMPTS: u32 = 2;

/// Fixed-backoff retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    /// Single attempt, never retried
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// At most `max_attempts` attempts separated by a fixed `backoff`,
    /// clamped to `1..=MAX_ATTEMPTS`
    pub fn fixed(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, MAX_ATTEMPTS),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// policy's attempts are exhausted. `op` receives the 1-based attempt number.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    action: &str,
    mut op: F,
) -> Result<T, UpstreamError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    info!("Upstream call {} succeeded after {} attempts", action, attempt);
                }
                return Ok(value);
            }
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempt >= policy.max_attempts => {
                if policy.max_attempts > 1 {
                    error!(
                        "Upstream call {} failed after {} attempts: {}",
                        action, attempt, e
                    );
                }
                return Err(e);
            }
            Err(e) => {
                record_retry(action, attempt, policy.max_attempts, &e);
                tokio::time::sleep(policy.backoff).await;
            }
        }
    }
}
