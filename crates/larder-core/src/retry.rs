//! Retry and backoff policy.
//!
//! [`RetryPolicy`] serves two purposes: it schedules the next attempt of a
//! queued operation after a transient failure, and it drives in-process
//! retries of short calls such as import compensations via [`with_retry`].
//!
//! # Example
//!
//! ```
//! use larder_core::{RetryPolicy, with_retry, Error};
//!
//! # async fn example() -> Result<(), Error> {
//! let policy = RetryPolicy::for_compensation();
//!
//! let value = with_retry(&policy, "delete store", || async {
//!     Ok::<_, Error>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use time::OffsetDateTime;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first (minimum 1).
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays (1.0 = constant).
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with `max_attempts` and default delays.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// A single attempt, never retried.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Short in-process retries for compensating actions.
    ///
    /// Rollback runs while the caller is waiting on the import, so delays
    /// stay well under a second.
    pub fn for_compensation() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Retry configuration for quick, time-sensitive calls.
    pub fn quick() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    /// Set the total number of attempts.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set initial delay.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Validate the policy.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::invalid_config("max_attempts must be at least 1"));
        }
        if self.initial_delay.is_zero() {
            return Err(Error::invalid_config("initial_delay must be > 0"));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::invalid_config("max_delay must be >= initial_delay"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(Error::invalid_config("backoff_multiplier must be >= 1.0"));
        }
        Ok(())
    }

    /// Delay before retrying after `failures` consecutive failures.
    ///
    /// `failures` is 1 after the first failure.
    pub fn delay_after(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.jitter {
            let jitter_factor = 1.0 + (rand::rng().random::<f64>() * 0.25);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::try_from_secs_f64(final_delay)
            .unwrap_or(self.max_delay)
            .min(self.max_delay.saturating_add(self.max_delay / 4))
    }

    /// When an operation that has failed `failures` times becomes due again.
    pub fn next_attempt_at(&self, failures: u32, now: OffsetDateTime) -> OffsetDateTime {
        let delay = time::Duration::try_from(self.delay_after(failures))
            .unwrap_or(time::Duration::MAX);
        now.saturating_add(delay)
    }

    /// Returns `true` once `attempts` has used up the policy.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

/// Execute an async operation, retrying retryable failures.
///
/// Returns the first success, the first non-retryable error, or the last
/// error once `policy.max_attempts` is reached.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, operation_name: &str, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("{} succeeded after {} attempts", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) if !is_retryable(&e) || attempt >= max_attempts => return Err(e),
            Err(e) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    operation_name, attempt, max_attempts, e, delay
                );
                sleep(delay).await;
            }
        }
    }
}

/// Check if an error is worth retrying.
pub fn is_retryable(error: &Error) -> bool {
    match error {
        Error::Remote(e) => !e.is_permanent(),
        Error::Timeout { .. } => true,
        Error::Cancelled => false,
        Error::Store(_) => false,
        Error::InvalidBatch(_) => false,
        Error::InvalidConfig(_) => false,
        Error::Serialization(_) => false,
    }
}
