//! Retry policy applied to every synthesis call.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::ServiceError;

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first. Always at least 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
    /// Pause after each successful call.
    pub inter_call_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            multiplier: if config.backoff_multiplier.is_finite() {
                config.backoff_multiplier.max(1.0)
            } else {
                1.0
            },
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            inter_call_delay: Duration::from_millis(config.inter_call_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// A policy with no waiting at all, for dry runs and tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
            max_backoff: Duration::ZERO,
            inter_call_delay: Duration::ZERO,
        }
    }

    /// Backoff before retry number `retry` (1 = first retry).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Delay before retrying after `error` failed attempt number `attempt`.
    ///
    /// A longer `Retry-After` from the service wins over the computed backoff.
    pub fn delay_after(&self, attempt: u32, error: &ServiceError) -> Duration {
        let backoff = self.backoff_for(attempt);
        match error.retry_after() {
            Some(requested) if requested > backoff => requested,
            _ => backoff,
        }
    }

    /// Whether attempt number `attempt` failing with `error` should be retried.
    pub fn should_retry(&self, attempt: u32, error: &ServiceError) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }
}
