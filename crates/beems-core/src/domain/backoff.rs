//! Backoff policy: decides the delay before a failed job is retried.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Retry as soon as a worker is free.
    Immediate,
    /// Wait the same delay before every retry.
    Fixed,
    /// Double the delay after every retry.
    Exponential,
}

impl BackoffStrategy {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        match raw {
            "immediate" => Ok(Self::Immediate),
            "fixed" => Ok(Self::Fixed),
            "exponential" => Ok(Self::Exponential),
            other => Err(ValidationError::job_option(
                "backoff",
                format!("unknown strategy {other:?}"),
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Fixed => "fixed",
            Self::Exponential => "exponential",
        }
    }
}

/// Backoff policy of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    pub strategy: BackoffStrategy,

    /// Base delay. Ignored for `Immediate`.
    #[serde(with = "super::millis")]
    pub delay: Duration,
}

impl Backoff {
    pub fn immediate() -> Self {
        Self {
            strategy: BackoffStrategy::Immediate,
            delay: Duration::ZERO,
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            delay,
        }
    }

    pub fn exponential(delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            delay,
        }
    }

    /// Delay before retry number `retry` (1-indexed).
    ///
    /// Exponential: `delay * 2^(retry - 1)`, so with 100ms the retries wait
    /// 100ms, 200ms, 400ms, ... Saturates instead of overflowing.
    pub fn next_delay(&self, retry: u32) -> Duration {
        match self.strategy {
            BackoffStrategy::Immediate => Duration::ZERO,
            BackoffStrategy::Fixed => self.delay,
            BackoffStrategy::Exponential => {
                let exponent = retry.saturating_sub(1).min(31);
                self.delay.saturating_mul(1u32 << exponent)
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::immediate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_is_immediate() {
        let backoff = Backoff::default();
        assert_eq!(backoff.strategy, BackoffStrategy::Immediate);
        assert_eq!(backoff.next_delay(5), Duration::ZERO);
    }

    #[rstest]
    #[case(1, 100)]
    #[case(2, 100)]
    #[case(7, 100)]
    fn fixed_backoff_is_constant(#[case] retry: u32, #[case] expected_ms: u64) {
        let backoff = Backoff::fixed(Duration::from_millis(100));
        assert_eq!(backoff.next_delay(retry), Duration::from_millis(expected_ms));
    }

    #[test]
    fn exponential_backoff_doubles() {
        let backoff = Backoff::exponential(Duration::from_millis(100));
        assert_eq!(backoff.next_delay(1), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(2), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(3), Duration::from_millis(400));
    }

    #[test]
    fn exponential_backoff_saturates() {
        let backoff = Backoff::exponential(Duration::from_secs(u64::MAX / 2));
        assert_eq!(backoff.next_delay(64), Duration::MAX);
    }

    #[test]
    fn strategy_names_round_trip() {
        for strategy in [
            BackoffStrategy::Immediate,
            BackoffStrategy::Fixed,
            BackoffStrategy::Exponential,
        ] {
            assert_eq!(BackoffStrategy::parse(strategy.as_str()).unwrap(), strategy);
        }
        assert!(BackoffStrategy::parse("linear").is_err());
    }
}
