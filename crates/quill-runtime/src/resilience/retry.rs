//! Bounded retry with linearly increasing delay.
//!
//! Only transient provider failures (connection, timeout) are retried.
//! Authentication, rate-limit and API errors return on the first attempt.

use backon::{BackoffBuilder, Retryable};
use std::future::Future;
use std::time::Duration;

use crate::providers::ProviderError;

/// Total attempts per buffered hosted call.
pub const MAX_RETRIES: u32 = 3;

/// Base delay; the n-th retry waits `n * RETRY_DELAY`.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Retry policy: `max_attempts` tries with delays of `base_delay`,
/// `2 * base_delay`, ... between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRIES,
            base_delay: RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }
}

/// Delay sequence produced by [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    base_delay: Duration,
    next: u32,
    remaining: u32,
}

impl Iterator for LinearBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let delay = self.base_delay * self.next;
        self.next += 1;
        Some(delay)
    }
}

impl BackoffBuilder for RetryPolicy {
    type Backoff = LinearBackoff;

    fn build(self) -> Self::Backoff {
        LinearBackoff {
            base_delay: self.base_delay,
            next: 1,
            remaining: self.max_attempts.saturating_sub(1),
        }
    }
}

/// Run `op`, retrying transient failures according to `policy`.
pub async fn retry_transient<T, F, Fut>(
    policy: RetryPolicy,
    provider: &str,
    op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    op.retry(policy)
        .sleep(tokio::time::sleep)
        .when(ProviderError::is_transient)
        .notify(|e: &ProviderError, delay: Duration| {
            tracing::warn!(provider, error = %e, delay = ?delay, "Transient failure, retrying");
        })
        .await
}
