//! Retry policy for failed deliveries.

use relay_config::QueueConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff between delivery attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempt ceiling applied to new jobs.
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,

    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_secs(60))
    }
}

impl From<&QueueConfig> for RetryPolicy {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.base_retry_delay_ms,
            max_delay_ms: config.max_retry_delay_ms,
        }
    }
}

impl RetryPolicy {
    /// Creates a doubling policy starting at `base_delay`, capped at one hour.
    pub fn exponential(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay_ms: base_delay.as_millis() as u64,
            max_delay_ms: 3_600_000,
        }
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Returns true if a job that has now failed `retry_count` times gets
    /// another attempt.
    pub fn should_retry(&self, retry_count: u32, max_retries: u32) -> bool {
        retry_count < max_retries
    }

    /// Delay before the attempt following failure number `retry_count`:
    /// `base * 2^(retry_count - 1)`, capped at the maximum.
    pub fn delay_for_retry(&self, retry_count: u32) -> Duration {
        if retry_count == 0 {
            return Duration::ZERO;
        }

        let exp = (retry_count - 1).min(63);
        let delay = 1u64
            .checked_shl(exp)
            .and_then(|factor| self.base_delay_ms.checked_mul(factor))
            .unwrap_or(u64::MAX);

        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::exponential(5, Duration::from_secs(60));
        assert_eq!(policy.delay_for_retry(0), Duration::ZERO);
        assert_eq!(policy.delay_for_retry(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for_retry(2), Duration::from_secs(120));
        assert_eq!(policy.delay_for_retry(3), Duration::from_secs(240));
    }

    #[test]
    fn test_backoff_strictly_increasing_until_cap() {
        let policy = RetryPolicy::exponential(10, Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(3600));
        let delays: Vec<_> = (1..=14).map(|n| policy.delay_for_retry(n)).collect();
        for pair in delays.windows(2) {
            assert!(pair[1] > pair[0] || pair[1] == Duration::from_secs(3600));
        }
        // 2^11 s is still under the cap; 2^12 s is not.
        assert_eq!(policy.delay_for_retry(12), Duration::from_secs(2048));
        assert_eq!(policy.delay_for_retry(13), Duration::from_secs(3600));
        assert_eq!(policy.delay_for_retry(14), Duration::from_secs(3600));
    }

    #[test]
    fn test_huge_retry_counts_saturate_at_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_retry(200), Duration::from_secs(3600));
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1, 3));
        assert!(policy.should_retry(2, 3));
        assert!(!policy.should_retry(3, 3));
    }

    #[test]
    fn test_from_config() {
        let policy = RetryPolicy::from(&QueueConfig::default());
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.delay_for_retry(1), Duration::from_secs(60));
    }
}
