//! Connection retry policy
//!
//! Fixed delay by default; a multiplier above 1.0 turns it into capped
//! exponential backoff.

use std::time::Duration;

use crate::config::PoolConfig;

/// Retry configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total handshake attempts, at least 1
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub delay: Duration,

    /// Delay multiplier for each further attempt
    pub backoff_multiplier: f64,

    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
            backoff_multiplier: 1.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// `max_attempts` attempts with a fixed `delay` between them
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            ..Default::default()
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.max_retries, config.retry_delay())
    }

    /// Set custom backoff parameters
    pub fn with_backoff(mut self, multiplier: f64, max_delay: Duration) -> Self {
        self.backoff_multiplier = multiplier;
        self.max_delay = max_delay;
        self
    }
}

/// Delay to wait after failed attempt number `attempt` (0-based)
pub fn calculate_backoff(attempt: u32, policy: &RetryPolicy) -> Duration {
    let factor = policy.backoff_multiplier.max(1.0).powi(attempt as i32);
    let delay = policy.delay.as_secs_f64() * factor;
    Duration::try_from_secs_f64(delay.min(policy.max_delay.as_secs_f64()))
        .unwrap_or(policy.max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_fixed_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(calculate_backoff(0, &policy), Duration::from_secs(2));
        assert_eq!(calculate_backoff(1, &policy), Duration::from_secs(2));
        assert_eq!(calculate_backoff(5, &policy), Duration::from_secs(2));
    }

    #[test]
    fn test_calculate_backoff_exponential() {
        let policy =
            RetryPolicy::new(5, Duration::from_secs(1)).with_backoff(2.0, Duration::from_secs(30));

        assert_eq!(calculate_backoff(0, &policy), Duration::from_secs(1));
        assert_eq!(calculate_backoff(1, &policy), Duration::from_secs(2));
        assert_eq!(calculate_backoff(2, &policy), Duration::from_secs(4));
        // Attempt 5: should cap at max_delay (30)
        assert_eq!(calculate_backoff(5, &policy), Duration::from_secs(30));
    }

    #[test]
    fn test_unbounded_max_delay_saturates() {
        let policy =
            RetryPolicy::new(3, Duration::from_secs(1)).with_backoff(2.0, Duration::MAX);

        assert_eq!(calculate_backoff(3, &policy), Duration::from_secs(8));
        assert_eq!(calculate_backoff(200, &policy), Duration::MAX);
    }

    #[test]
    fn test_at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn test_from_config() {
        let config = PoolConfig {
            max_retries: 4,
            retry_delay_secs: 1,
            ..Default::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.delay, Duration::from_secs(1));
    }
}
