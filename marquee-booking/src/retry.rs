use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter, used for transient store failures and
/// balance version conflicts during settlement.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt; `attempt` is zero-based.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let doubled = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(attempt));
        let jitter_cap = (self.base_backoff.as_millis() as u64 / 2).max(1);
        let jitter = rand::thread_rng().gen_range(0..jitter_cap);
        doubled + Duration::from_millis(jitter)
    }

    pub fn attempts_left(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_exponentially() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_backoff: Duration::from_millis(100),
        };
        let jitter_cap = Duration::from_millis(50);
        assert!(policy.backoff(0) >= Duration::from_millis(100));
        assert!(policy.backoff(0) < Duration::from_millis(100) + jitter_cap);
        assert!(policy.backoff(2) >= Duration::from_millis(400));
        assert!(policy.backoff(2) < Duration::from_millis(400) + jitter_cap);
    }

    #[test]
    fn test_attempts_left() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
        };
        assert!(policy.attempts_left(0));
        assert!(policy.attempts_left(1));
        assert!(!policy.attempts_left(2));
    }
}
