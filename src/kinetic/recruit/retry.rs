// SPDX-License-Identifier: MIT

//! Fixed-delay retry policy

use reqwest::StatusCode;
use std::time::Duration;

/// Retry schedule expressed as the delay before each retry.
///
/// The first attempt is immediate; attempt `n` (0-based) is followed by
/// `delays[n]` if it fails with a retryable status.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Never retry
    pub fn none() -> Self {
        Self::new(vec![])
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Initial attempt plus one per configured delay
    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Delay to wait after a failed `attempt`, or `None` when retries are exhausted
    pub fn delay_after(&self, attempt: usize) -> Option<Duration> {
        self.delays.get(attempt).copied()
    }

    /// Only server-side failures are worth another try
    pub fn is_retryable(status: StatusCode) -> bool {
        status.is_server_error()
    }

    /// Worst-case time spent sleeping between attempts
    pub fn total_delay(&self) -> Duration {
        self.delays.iter().sum()
    }
}

impl Default for RetryPolicy {
    /// 0.5s, 1s, 2s
    fn default() -> Self {
        Self::new(vec![
            Duration::from_millis(500),
            Duration::from_secs(1),
            Duration::from_secs(2),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.delay_after(0), Some(Duration::from_millis(500)));
        assert_eq!(policy.delay_after(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_after(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_after(3), None);
        assert_eq!(policy.total_delay(), Duration::from_millis(3500));
    }

    #[test]
    fn test_none_policy() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.delay_after(0), None);
    }

    #[test]
    fn test_only_server_errors_retry() {
        assert!(RetryPolicy::is_retryable(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(RetryPolicy::is_retryable(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!RetryPolicy::is_retryable(StatusCode::BAD_REQUEST));
        assert!(!RetryPolicy::is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(!RetryPolicy::is_retryable(StatusCode::OK));
    }
}
