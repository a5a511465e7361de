// Bounded retry on a fixed delay, shared by the synchronizer so its policy
// can be tested apart from the fetch mechanism.

use crate::error::RecorderError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Retry budget: up to `max_retries` further attempts after the initial one,
/// each preceded by the same flat `delay`. Divergent variants converge on the
/// origin's next update, so growing the delay would only add latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }
}

/// Result of a single attempt, signalling retryability to the combinator.
pub enum RetryAction<T> {
    Success(T),
    /// Transient failure; try again after the policy delay.
    Retry(RecorderError),
    /// Permanent failure; give up immediately.
    Fail(RecorderError),
}

/// Drive an async operation until it succeeds, fails permanently, exhausts
/// the policy's attempts, or is cancelled.
///
/// The `operation` closure receives the attempt number, starting at zero.
/// Cancellation is observed before each attempt and during each delay.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: F,
) -> Result<T, RecorderError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = RetryAction<T>>,
{
    let mut attempt = 0;
    loop {
        if token.is_cancelled() {
            return Err(RecorderError::Cancelled);
        }

        let err = match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => return Err(err),
            RetryAction::Retry(err) => err,
        };

        attempt += 1;
        if attempt > policy.max_retries {
            return Err(err);
        }
        warn!(
            attempt,
            max = policy.max_retries,
            error = %err,
            "Retrying after transient error"
        );
        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(RecorderError::Cancelled),
            _ = tokio::time::sleep(policy.delay) => {}
        }
    }
}
