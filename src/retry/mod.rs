//! Exponential backoff with jitter for calls to external services.
//!
//! Every outbound call (search, enrichment, org listing) goes through
//! [`retry_with_backoff`]. Errors classify themselves through [`Retryable`];
//! unrecoverable errors stop the loop immediately, everything else is retried
//! until the attempt budget is spent.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Classification hook for errors passed through the retry loop.
pub trait Retryable {
    /// True when retrying cannot help (bad credentials, malformed request).
    fn is_unrecoverable(&self) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random delay added on top of the backoff.
    pub max_jitter: Duration,
    /// Hard cap on a single attempt.
    pub attempt_timeout: Duration,
}

impl RetryConfig {
    pub const DEFAULT: Self = Self {
        max_attempts: 10,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(120),
        max_jitter: Duration::from_millis(100),
        attempt_timeout: Duration::from_secs(30),
    };

    /// Short budget for re-checks triggered by push events.
    pub const EVENT: Self = Self {
        max_attempts: 3,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(10),
        max_jitter: Duration::from_millis(100),
        attempt_timeout: Duration::from_secs(10),
    };

    /// Backoff before retry number `retry` (0-indexed), without jitter.
    ///
    /// `initial_delay * 2^retry`, capped at `max_delay`.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2f64.powi(retry.min(30) as i32);
        let secs = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Backoff plus a random jitter, still capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        (self.backoff_for(retry) + jitter).min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    #[error("unrecoverable error: {0}")]
    Unrecoverable(#[source] E),

    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    #[error("gave up after {attempts} attempts: last attempt timed out after {timeout:?}")]
    TimedOut { attempts: u32, timeout: Duration },

    #[error("cancelled")]
    Cancelled,
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled)
    }

    /// The underlying error of the last attempt, if there was one.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Unrecoverable(e) => Some(e),
            RetryError::Exhausted { source, .. } => Some(source),
            RetryError::TimedOut { .. } | RetryError::Cancelled => None,
        }
    }
}

enum AttemptOutcome<T, E> {
    Done(T),
    Failed(E),
    TimedOut,
}

/// Runs `operation` until it succeeds, fails unrecoverably, runs out of
/// attempts, or `cancel` fires.
///
/// `label` only feeds the log lines.
pub async fn retry_with_backoff<T, E, F, Fut>(
    label: &str,
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    E: std::error::Error + Retryable + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        attempt += 1;

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            res = tokio::time::timeout(config.attempt_timeout, operation()) => match res {
                Ok(Ok(value)) => AttemptOutcome::Done(value),
                Ok(Err(e)) => AttemptOutcome::Failed(e),
                Err(_) => AttemptOutcome::TimedOut,
            },
        };

        match outcome {
            AttemptOutcome::Done(value) => {
                if attempt > 1 {
                    debug!(op = label, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            AttemptOutcome::Failed(e) if e.is_unrecoverable() => {
                warn!(op = label, attempt, error = %e, "Unrecoverable error, not retrying");
                return Err(RetryError::Unrecoverable(e));
            }
            AttemptOutcome::Failed(e) => {
                if attempt >= max_attempts {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        source: e,
                    });
                }
                warn!(op = label, attempt, max_attempts, error = %e, "Attempt failed, will retry");
            }
            AttemptOutcome::TimedOut => {
                if attempt >= max_attempts {
                    return Err(RetryError::TimedOut {
                        attempts: attempt,
                        timeout: config.attempt_timeout,
                    });
                }
                warn!(
                    op = label,
                    attempt,
                    max_attempts,
                    timeout = ?config.attempt_timeout,
                    "Attempt timed out, will retry"
                );
            }
        }

        let delay = config.delay_for(attempt - 1);
        tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
