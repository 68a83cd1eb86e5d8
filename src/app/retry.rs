//! Retry policy shared by search-call retries and download retries.
//!
//! Implements exponential backoff with a cap. Backoff is expressed as an
//! explicit `next_eligible_at` timestamp checked by the scheduler's dequeue
//! pass, which keeps retry timing deterministic under test.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{queue, workers};
use crate::errors::DownloadError;

/// Exponential backoff policy with a growth cap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries before permanent failure
    pub max_retries: u32,
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Cap for exponential growth
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: queue::DEFAULT_MAX_RETRIES,
            base_delay: workers::RETRY_BASE_DELAY,
            max_delay: workers::RETRY_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Backoff duration for a given retry count: `base * 2^(count-1)`, capped.
    ///
    /// `retry_count` is the number of failures already recorded, so the first
    /// retry (count 1) waits exactly `base_delay`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        if retry_count == 0 {
            return Duration::ZERO;
        }
        let exp = retry_count.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }

    /// Timestamp before which a failed item must not be dequeued again
    pub fn next_eligible_at(&self, retry_count: u32) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::from_std(self.backoff(retry_count)).unwrap_or_default()
    }

    /// Whether a failure counts against the retry budget.
    ///
    /// `max_retries` is the per-item budget, which may differ from the
    /// policy-wide default this policy carries.
    pub fn should_retry(&self, error: &DownloadError, retry_count: u32, max_retries: u32) -> bool {
        error.is_retryable() && retry_count < max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_secs: u64, max_secs: u64, max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_secs(base_secs),
            max_delay: Duration::from_secs(max_secs),
        }
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let p = policy(30, 3600, 5);
        assert_eq!(p.backoff(0), Duration::ZERO);
        assert_eq!(p.backoff(1), Duration::from_secs(30));
        assert_eq!(p.backoff(2), Duration::from_secs(60));
        assert_eq!(p.backoff(3), Duration::from_secs(120));
        assert_eq!(p.backoff(4), Duration::from_secs(240));
    }

    #[test]
    fn test_backoff_is_capped() {
        let p = policy(60, 300, 10);
        assert_eq!(p.backoff(3), Duration::from_secs(240));
        assert_eq!(p.backoff(4), Duration::from_secs(300));
        assert_eq!(p.backoff(9), Duration::from_secs(300));
    }

    #[test]
    fn test_backoff_survives_large_counts() {
        let p = policy(60, 600, 100);
        // Shift widths past 31 must not overflow
        assert_eq!(p.backoff(64), Duration::from_secs(600));
    }

    #[test]
    fn test_next_eligible_at_in_future() {
        let p = policy(60, 3600, 3);
        let now = Utc::now();
        let at = p.next_eligible_at(1);
        let delta = (at - now).num_seconds();
        assert!((59..=61).contains(&delta), "unexpected delta {}", delta);
    }

    #[test]
    fn test_should_retry_respects_error_class() {
        let p = policy(1, 10, 3);
        let timeout = DownloadError::Timeout { seconds: 5 };
        let cancelled = DownloadError::Cancelled;

        assert!(p.should_retry(&timeout, 0, 3));
        assert!(p.should_retry(&timeout, 2, 3));
        assert!(!p.should_retry(&timeout, 3, 3));
        assert!(!p.should_retry(&cancelled, 0, 3));
    }

    #[test]
    fn test_should_retry_uses_caller_budget_not_policy_default() {
        let p = policy(1, 10, 3);
        let timeout = DownloadError::Timeout { seconds: 5 };

        // An item override below the policy default wins
        assert!(!p.should_retry(&timeout, 0, 0));
        // And one above it wins too
        assert!(p.should_retry(&timeout, 4, 6));
    }
}
