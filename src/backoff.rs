use std::time::Duration;

/// Delay before a retryable failure is attempted again.
///
/// `delay(attempts) = min(base * 2^attempts, max_delay)`, where `attempts` is
/// the count already consumed by the failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60 * 60))
    }
}

impl BackoffPolicy {
    pub const fn new(base: Duration, max_delay: Duration) -> Self {
        Self { base, max_delay }
    }

    /// Retries are due immediately.
    pub const fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn delay(&self, attempts: i32) -> Duration {
        let exponent = u32::try_from(attempts).unwrap_or(0);
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}
