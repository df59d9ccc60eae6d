use std::future::Future;

use derive_more::derive::Display;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Wait before the next try, after `attempt` (1-based) failed: 2s, 4s, 8s...
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1 << attempt.min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

#[derive(Debug, Display)]
pub enum RetryError<E> {
    #[display("cancelled")]
    Cancelled,
    #[display("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

/// Run `op` until it succeeds or `policy.max_attempts` is reached.
///
/// Cancellation is observed before each attempt and during the backoff sleep;
/// once the token fires the last error is discarded and `Cancelled` returned.
pub async fn with_retry<T, E, F, Fut>(
    cancel: &CancellationToken,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        attempt += 1;

        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if attempt >= policy.max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }

        let delay = policy.delay_after(attempt);
        tracing::info!(
            "Attempt {}/{} failed: {}. Retrying in {:?}",
            attempt,
            policy.max_attempts,
            err,
            delay
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = sleep(delay) => {}
        }
    }
}
