//! Backoff for read-modify-write loops that lose a revision race

use std::time::Duration;

/// How many times a conflicting mutation is re-read and re-applied, and how
/// long to sleep in between
///
/// Sleeps double from `base_delay_ms` and never exceed `max_delay_ms`.
///
/// ```ignore
/// db.set_retry_config(RetryConfig::new().with_max_retries(20));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Extra attempts after the first; zero surfaces the first conflict
    pub max_retries: usize,
    /// Sleep before the first retry, in milliseconds
    pub base_delay_ms: u64,
    /// Upper bound on any single sleep, in milliseconds
    pub max_delay_ms: u64,
}

const DEFAULT_MAX_RETRIES: usize = 5;
const DEFAULT_BASE_DELAY_MS: u64 = 1;
const DEFAULT_MAX_DELAY_MS: u64 = 50;

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl RetryConfig {
    /// Defaults: 5 retries, 1 ms doubling up to 50 ms
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail on the first `RevisionConflict`
    pub fn no_retry() -> Self {
        Self::new().with_max_retries(0)
    }

    /// Set the number of extra attempts
    pub fn with_max_retries(self, max_retries: usize) -> Self {
        RetryConfig { max_retries, ..self }
    }

    /// Set the first backoff sleep
    pub fn with_base_delay_ms(self, base_delay_ms: u64) -> Self {
        RetryConfig {
            base_delay_ms,
            ..self
        }
    }

    /// Set the backoff ceiling
    pub fn with_max_delay_ms(self, max_delay_ms: u64) -> Self {
        RetryConfig {
            max_delay_ms,
            ..self
        }
    }

    /// Sleep before the retry that follows failed attempt `attempt`
    /// (counting from zero)
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        let factor = u32::try_from(attempt)
            .ok()
            .and_then(|exp| 2u64.checked_pow(exp))
            .unwrap_or(u64::MAX);
        let millis = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        let config = RetryConfig::new()
            .with_base_delay_ms(2)
            .with_max_delay_ms(10);
        let delays: Vec<u64> = (0..5)
            .map(|a| config.calculate_delay(a).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 10, 10]);
        assert_eq!(config.calculate_delay(500), Duration::from_millis(10));
    }

    #[test]
    fn test_zero_base_never_sleeps() {
        let config = RetryConfig::new().with_base_delay_ms(0);
        assert_eq!(config.calculate_delay(40), Duration::ZERO);
    }

    #[test]
    fn test_no_retry_keeps_delays() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.base_delay_ms, RetryConfig::default().base_delay_ms);
    }
}
