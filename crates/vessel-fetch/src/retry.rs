//! Retry policy and the generic backoff combinator

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Errors that know whether trying again could help.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

/// Exponential backoff schedule.
///
/// Attempt 1 runs immediately. Attempt `n > 1` waits
/// `initial_delay * multiplier^(n - 2)`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// 500ms doubling up to one minute, 20 attempts in total.
    pub const fn network() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            multiplier: 2,
            max_delay: Duration::from_secs(60),
            max_attempts: 20,
        }
    }

    /// A single attempt, no retries.
    pub const fn none() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            multiplier: 1,
            max_delay: Duration::ZERO,
            max_attempts: 1,
        }
    }

    pub fn is_retrying(&self) -> bool {
        self.max_attempts > 1
    }

    /// Delay to sleep before the given 1-based attempt, or `None` when that
    /// attempt is not allowed (or is the first one).
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if attempt <= 1 || attempt > self.max_attempts {
            return None;
        }

        let exponent = attempt - 2;
        let delay = self
            .multiplier
            .checked_pow(exponent)
            .and_then(|factor| self.initial_delay.checked_mul(factor))
            .unwrap_or(self.max_delay);

        Some(delay.min(self.max_delay))
    }

    /// The full sleep schedule between attempts.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (2..=self.max_attempts).filter_map(move |attempt| self.delay_before(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Runs `op` until it succeeds, fails with a non-transient error, or the
/// policy runs out of attempts. The attempt number (1-based) is passed in.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Succeeded after retrying");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() => match policy.delay_before(attempt + 1) {
                Some(delay) => {
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying with backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    if policy.is_retrying() {
                        tracing::error!(attempt, error = %err, "Giving up after final attempt");
                    }
                    return Err(err);
                }
            },
            Err(err) => return Err(err),
        }
    }
}
