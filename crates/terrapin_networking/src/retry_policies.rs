//! Reexports the trait [`RetryPolicy`] from the `retry_policies` crate as
//! well as all implementations, plus the fixed-interval policy the cache
//! engine uses. Retries here are deliberately flat: a bounded attempt count
//! with a constant delay, no exponential back-off.

use std::time::{Duration, SystemTime};

pub use retry_policies::{policies::*, Jitter, RetryDecision, RetryPolicy};

/// A simple [`RetryPolicy`] that just never retries.
#[derive(Clone, Copy)]
pub struct DoNotRetryPolicy;

impl RetryPolicy for DoNotRetryPolicy {
    fn should_retry(&self, _: SystemTime, _: u32) -> RetryDecision {
        RetryDecision::DoNotRetry
    }
}

/// Retry with a constant delay until the attempt bound is reached.
///
/// `n_past_retries` is interpreted as the number of attempts already made,
/// so a policy with `max_attempts = 5` allows five requests in total.
#[derive(Debug, Clone, Copy)]
pub struct FixedInterval {
    delay: Duration,
    max_attempts: u32,
}

impl FixedInterval {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: max_attempts.max(1),
        }
    }
}

impl RetryPolicy for FixedInterval {
    fn should_retry(&self, _request_start: SystemTime, n_past_retries: u32) -> RetryDecision {
        if n_past_retries >= self.max_attempts {
            RetryDecision::DoNotRetry
        } else {
            RetryDecision::Retry {
                execute_after: SystemTime::now() + self.delay,
            }
        }
    }
}

/// The policy for archive downloads: five attempts, two seconds apart.
pub fn download_retry_policy() -> FixedInterval {
    FixedInterval::new(Duration::from_secs(2), 5)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::{
        download_retry_policy, DoNotRetryPolicy, FixedInterval, RetryDecision, RetryPolicy,
    };

    #[test]
    fn fixed_interval_respects_the_attempt_bound() {
        // Three attempts total: retries are allowed after the first and
        // second attempt, not after the third.
        let policy = FixedInterval::new(Duration::from_millis(10), 3);
        let start = SystemTime::now();
        assert!(matches!(
            policy.should_retry(start, 1),
            RetryDecision::Retry { .. }
        ));
        assert!(matches!(
            policy.should_retry(start, 2),
            RetryDecision::Retry { .. }
        ));
        assert!(matches!(
            policy.should_retry(start, 3),
            RetryDecision::DoNotRetry
        ));
    }

    #[test]
    fn download_policy_allows_five_attempts() {
        let policy = download_retry_policy();
        let start = SystemTime::now();
        assert!(matches!(
            policy.should_retry(start, 4),
            RetryDecision::Retry { .. }
        ));
        assert!(matches!(
            policy.should_retry(start, 5),
            RetryDecision::DoNotRetry
        ));
    }

    #[test]
    fn do_not_retry_never_retries() {
        assert!(matches!(
            DoNotRetryPolicy.should_retry(SystemTime::now(), 0),
            RetryDecision::DoNotRetry
        ));
    }
}
