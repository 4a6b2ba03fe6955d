//! Engine tuning options.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Options controlling the sync engine.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use larder_core::{RetryPolicy, SyncOptions};
///
/// let options = SyncOptions::default()
///     .call_timeout(Duration::from_secs(10))
///     .retry(RetryPolicy::new(5))
///     .start_online(false);
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    /// Deadline for a single remote call made while draining.
    pub call_timeout: Duration,
    /// Backoff and dead-letter policy for queued operations.
    pub retry: RetryPolicy,
    /// Retry policy for import compensations.
    pub compensation_retry: RetryPolicy,
    /// How often the background driver re-checks the log for due retries.
    pub retry_interval: Duration,
    /// Age under which a cached snapshot is reported as fresh.
    pub freshness_window: Duration,
    /// Age after which cached snapshots are discarded.
    pub cache_retention: Duration,
    /// Connectivity assumed at startup.
    pub start_online: bool,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            compensation_retry: RetryPolicy::for_compensation(),
            retry_interval: Duration::from_secs(30),
            freshness_window: Duration::from_secs(5 * 60),
            cache_retention: Duration::from_secs(7 * 24 * 60 * 60),
            start_online: true,
            event_capacity: 100,
        }
    }
}

impl SyncOptions {
    /// Set the per-call timeout.
    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the queue retry policy.
    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Set the compensation retry policy.
    #[must_use]
    pub fn compensation_retry(mut self, policy: RetryPolicy) -> Self {
        self.compensation_retry = policy;
        self
    }

    /// Set the background retry interval.
    #[must_use]
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the cache freshness window.
    #[must_use]
    pub fn freshness_window(mut self, window: Duration) -> Self {
        self.freshness_window = window;
        self
    }

    /// Set the cache retention period.
    #[must_use]
    pub fn cache_retention(mut self, retention: Duration) -> Self {
        self.cache_retention = retention;
        self
    }

    /// Set the initial connectivity.
    #[must_use]
    pub fn start_online(mut self, online: bool) -> Self {
        self.start_online = online;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<()> {
        if self.call_timeout.is_zero() {
            return Err(Error::invalid_config("call_timeout must be > 0"));
        }
        if self.retry_interval.is_zero() {
            return Err(Error::invalid_config("retry_interval must be > 0"));
        }
        if self.freshness_window > self.cache_retention {
            return Err(Error::invalid_config(
                "freshness_window must not exceed cache_retention",
            ));
        }
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be > 0"));
        }
        self.retry.validate()?;
        self.compensation_retry.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let options = SyncOptions::default();
        assert_eq!(options.call_timeout, Duration::from_secs(30));
        assert_eq!(options.retry.max_attempts, 8);
        assert!(options.start_online);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let options = SyncOptions::default().call_timeout(Duration::ZERO);
        assert!(matches!(options.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_freshness_beyond_retention() {
        let options = SyncOptions::default()
            .freshness_window(Duration::from_secs(3600))
            .cache_retention(Duration::from_secs(60));
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_validate_checks_retry_policy() {
        let options = SyncOptions::default().retry(RetryPolicy::new(0));
        assert!(options.validate().is_err());
    }
}
