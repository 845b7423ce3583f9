//! Retry schedule and failure classification.

use crate::config::{ConfigError, RetryConfig, TransferConfig};
use crate::error::UploadError;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::time::Duration;

/// How many times to retry, how long to wait, and which failures are final.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Transfer statuses treated as permanent failures
    pub permanent_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            permanent_statuses: Vec::new(),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(retry: &RetryConfig, transfer: &TransferConfig) -> Self {
        Self {
            max_retries: retry.max_retries,
            initial_delay: Duration::from_millis(retry.initial_delay_ms),
            multiplier: retry.backoff_multiplier,
            max_delay: Duration::from_millis(retry.max_delay_ms),
            permanent_statuses: transfer.permanent_statuses.clone(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Fails for multipliers below 1.0 or not finite, like `Config::validate`
    pub fn with_multiplier(mut self, multiplier: f64) -> Result<Self, ConfigError> {
        check_multiplier(multiplier)?;
        self.multiplier = multiplier;
        Ok(self)
    }

    pub fn with_permanent_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.permanent_statuses = statuses;
        self
    }

    /// Delay schedule for one upload. Jitter is disabled so the waits are
    /// exactly `initial * multiplier^n`, capped at `max_delay`.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_delay,
            initial_interval: self.initial_delay,
            randomization_factor: 0.0,
            multiplier: self.multiplier,
            max_interval: self.max_delay.max(self.initial_delay),
            max_elapsed_time: None, // Bounded by max_retries instead
            ..Default::default()
        }
    }

    /// Whether `error` may be retried in principle
    pub fn is_retryable(&self, error: &UploadError) -> bool {
        match error {
            UploadError::TransferFailed { status } if self.permanent_statuses.contains(status) => {
                false
            }
            other => other.is_retryable(),
        }
    }

    /// Whether another attempt should follow failed attempt number `attempt` (1-based)
    pub fn should_retry(&self, error: &UploadError, attempt: u32) -> bool {
        attempt <= self.max_retries && self.is_retryable(error)
    }
}

/// Iterate the delays a policy would produce, for logging and tests
pub fn delay_schedule(policy: &RetryPolicy) -> impl Iterator<Item = Duration> {
    let mut backoff = policy.backoff();
    (0..policy.max_retries).filter_map(move |_| backoff.next_backoff())
}

/// A multiplier must keep the schedule from shrinking
pub(crate) fn check_multiplier(multiplier: f64) -> Result<(), ConfigError> {
    if multiplier.is_finite() && multiplier >= 1.0 {
        return Ok(());
    }
    Err(ConfigError::InvalidValue {
        field: "retry.backoff_multiplier".to_string(),
        message: "must be at least 1.0".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule_doubles() {
        let delays: Vec<_> = delay_schedule(&RetryPolicy::default()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[test]
    fn test_with_multiplier_rejects_shrinking_schedule() {
        assert!(RetryPolicy::default().with_multiplier(0.5).is_err());
        assert!(RetryPolicy::default().with_multiplier(f64::NAN).is_err());
        assert!(RetryPolicy::default().with_multiplier(f64::INFINITY).is_err());

        let policy = RetryPolicy::default().with_multiplier(1.5).unwrap();
        let delays: Vec<_> = delay_schedule(&policy).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(1500),
                Duration::from_millis(2250)
            ]
        );
    }

    #[test]
    fn test_schedule_respects_cap() {
        let policy = RetryPolicy {
            max_retries: 5,
            max_delay: Duration::from_secs(3),
            ..Default::default()
        };
        let delays: Vec<_> = delay_schedule(&policy).collect();
        assert_eq!(delays.len(), 5);
        assert_eq!(delays[1], Duration::from_secs(2));
        assert!(delays[2..].iter().all(|d| *d == Duration::from_secs(3)));
    }

    #[test]
    fn test_should_retry_respects_budget() {
        let policy = RetryPolicy::default();
        let err = UploadError::TransferFailed { status: 500 };

        assert!(policy.should_retry(&err, 1));
        assert!(policy.should_retry(&err, 3));
        assert!(!policy.should_retry(&err, 4));
        assert!(!policy.should_retry(&UploadError::Cancelled, 1));
    }

    #[test]
    fn test_permanent_statuses() {
        let policy = RetryPolicy::default().with_permanent_statuses(vec![403]);
        assert!(!policy.is_retryable(&UploadError::TransferFailed { status: 403 }));
        assert!(policy.is_retryable(&UploadError::TransferFailed { status: 503 }));
    }

    #[test]
    fn test_zero_retries() {
        let policy = RetryPolicy::default().with_max_retries(0);
        assert_eq!(delay_schedule(&policy).count(), 0);
        assert!(!policy.should_retry(&UploadError::NetworkError("x".into()), 1));
    }
}
