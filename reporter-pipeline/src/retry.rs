//! Bounded exponential backoff for transient adapter failures.

use backon::ExponentialBuilder;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt of a stage
    pub ceiling: u32,
    pub base: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            ceiling: 3,
            base: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(ceiling: u32, base: Duration) -> Self {
        Self {
            ceiling,
            base,
            ..Self::default()
        }
    }

    /// No waiting between attempts (tests, dry runs).
    pub fn immediate(ceiling: u32) -> Self {
        Self {
            ceiling,
            base: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Backoff schedule: `base`, doubling per retry, capped at `max_delay`,
    /// at most `ceiling` retries after the first call.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times(self.ceiling as usize)
    }
}
