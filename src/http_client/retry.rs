//! Retry policy for remote fetches.

use std::time::Duration;

/// Longest server-requested wait we honour.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// How the fetch primitive retries failed requests.
///
/// Transport failures (timeouts, refused or reset connections) and the
/// statuses in `retryable_statuses` are retried up to `max_retries` times;
/// anything else fails on the first attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further retry.
    pub backoff_base: Duration,
    /// Ceiling for the computed backoff.
    pub max_backoff: Duration,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(300),
            max_backoff: Duration::from_secs(10),
            retryable_statuses: vec![429, 500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Whether another attempt is allowed after `attempt` (0-based) failed.
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Exponential backoff for a 0-based attempt.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.backoff_base
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Delay before the next attempt; a server `Retry-After` wins.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        retry_after.unwrap_or_else(|| self.backoff_delay(attempt))
    }
}

/// Parse a `Retry-After` header given in seconds (capped at one minute).
pub fn parse_retry_after(header_value: Option<&str>) -> Option<Duration> {
    let value = header_value?;
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(300));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(600));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(1200));
        assert_eq!(policy.backoff_delay(10), Duration::from_secs(10));
        assert_eq!(policy.backoff_delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_retryable_statuses() {
        let policy = RetryPolicy::default();
        for status in [429, 500, 502, 503, 504] {
            assert!(policy.is_retryable_status(status));
        }
        assert!(!policy.is_retryable_status(404));
        assert!(!policy.is_retryable_status(403));
    }

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::default();
        assert!(policy.can_retry(0));
        assert!(policy.can_retry(2));
        assert!(!policy.can_retry(3));
        assert!(!RetryPolicy::none().can_retry(0));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some("5")), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after(Some("3600")), Some(Duration::from_secs(60)));
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT")), None);
        assert_eq!(parse_retry_after(None), None);

        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
    }
}
