//! Bounded retry with fixed or exponential delay.

use std::future::Future;
use std::time::Duration;

/// How many times to try an operation and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub attempts: u32,
    /// Delay before the second attempt.
    pub delay: Duration,
    /// Multiplier applied to the delay after each failed retry (1.0 = fixed).
    pub backoff: f64,
}

impl RetryPolicy {
    pub const fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            delay,
            backoff: 1.0,
        }
    }

    pub const fn exponential(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            delay,
            backoff: 2.0,
        }
    }

    /// Delay to sleep before attempt number `attempt` (1-based; attempt 1 never waits).
    ///
    /// Saturates at [`Duration::MAX`] instead of overflowing.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 || self.delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
        let factor = self.backoff.max(1.0).powi(exponent);
        Duration::try_from_secs_f64(self.delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
    }
}

/// The last error after every attempt failed.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last: E,
}

/// Run `op` until it succeeds or the policy's attempts are used up.
pub async fn retry<T, E, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, Exhausted<E>>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                tracing::warn!(
                    op = label,
                    attempt,
                    max_attempts = attempts,
                    error = %e,
                    "attempt failed, retrying"
                );
                attempt += 1;
            }
            Err(e) => {
                tracing::warn!(op = label, attempts, error = %e, "all attempts failed");
                return Err(Exhausted { attempts, last: e });
            }
        }
    }
}
