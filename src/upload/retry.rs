use crate::error::DeliveryError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Bounded retry budget with exponential backoff between attempts.
///
/// The budget counts the first attempt. Before attempt `n` (1-based, `n > 1`)
/// the caller sleeps `base_delay * 2^(n - 2)`: 100ms, 200ms, 400ms, ...
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ATTEMPTS, DEFAULT_BASE_DELAY)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait before the given 1-based attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2).min(16);
        self.base_delay.saturating_mul(1 << exp)
    }
}

/// Runs `send` until it succeeds, hits a fatal error or the budget runs out.
///
/// `send` receives the 1-based attempt number. Fatal errors are returned as
/// they are; running out of attempts yields [`DeliveryError::Exhausted`]
/// wrapping the last failure. Cancelling `cancel` abandons the pending
/// attempt or backoff and yields [`DeliveryError::Cancelled`].
pub async fn send_with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut send: F,
) -> Result<T, DeliveryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, DeliveryError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::debug!("delivery cancelled during backoff before attempt {}", attempt);
                    return Err(DeliveryError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::debug!("delivery cancelled during attempt {}", attempt);
                return Err(DeliveryError::Cancelled);
            }
            result = send(attempt) => result,
        };

        let err = match result {
            Ok(value) => {
                log::debug!("delivery succeeded after {} attempt(s)", attempt);
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            log::debug!("attempt {} failed with fatal error: {}", attempt, err);
            return Err(err);
        }

        if attempt >= policy.max_attempts {
            log::warn!("giving up after {} attempts: {}", attempt, err);
            return Err(DeliveryError::Exhausted {
                attempts: attempt,
                source: Box::new(err),
            });
        }

        log::debug!(
            "attempt {}/{} failed, retrying: {}",
            attempt,
            policy.max_attempts,
            err
        );
    }
}
