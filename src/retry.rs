use std::time::Duration;

/// Retry policy for the upstream fetcher's transport-level retries.
///
/// Only transport errors (connection failures, read timeouts, other
/// transient non-429 errors) are retried under this policy; typed
/// upstream errors (429, validation, a missing `response_id`) are
/// never retried here — they propagate immediately to the caller or
/// to the rate limiter.
///
/// With the defaults below, `backoff_duration(attempt)` reduces to
/// `retry_backoff.powi(attempt)` seconds, matching the
/// `delay = backoff_base^attempt` formula from the upstream protocol
/// contract.
///
/// # Examples
///
/// ```rust
/// use serp_aggregator::RetryPolicy;
/// use std::time::Duration;
///
/// let default_policy = RetryPolicy::default();
///
/// let custom_policy = RetryPolicy::new(5)
///     .with_max_delay(Duration::from_secs(60))
///     .with_backoff_multiplier(1.5);
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts.
    pub max_retries: usize,
    /// Base delay before the first retry attempt.
    pub base_delay: Duration,
    /// Maximum delay between retry attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff calculation (the protocol's
    /// `retry_backoff` setting).
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with the given retry cap and default
    /// backoff shape.
    pub fn new(max_retries: usize) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Set the base delay between retries.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier for exponential backoff.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculate the backoff duration for a given retry attempt.
    pub fn backoff_duration(&self, attempt: usize) -> Duration {
        let delay =
            self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let delay_secs = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_from_one_second() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_duration(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_duration(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_duration(2), Duration::from_secs(4));
    }

    #[test]
    fn backoff_is_capped_at_max_delay() {
        let policy = RetryPolicy::new(10).with_max_delay(Duration::from_secs(5));
        assert_eq!(policy.backoff_duration(10), Duration::from_secs(5));
    }
}
