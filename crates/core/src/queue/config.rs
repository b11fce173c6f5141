use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy applied by a queue to failed jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts before a job is moved to the failed (dead) state.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound for the retry delay in milliseconds.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// How long a reserved job stays invisible before another worker may claim it.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> u64 {
    1_000
}

fn default_max_backoff() -> u64 {
    300_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_visibility_timeout() -> u64 {
    300
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            visibility_timeout_secs: default_visibility_timeout(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the given (1-based) failed attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let delay = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = delay.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff_ms = backoff.as_millis() as u64;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(2_000));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(4_000));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_backoff_ms: 10_000,
            ..Default::default()
        };
        assert_eq!(policy.backoff_for(20), Duration::from_millis(10_000));
        assert_eq!(policy.backoff_for(u32::MAX), Duration::from_millis(10_000));
    }
}
