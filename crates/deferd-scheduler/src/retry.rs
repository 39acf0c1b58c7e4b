//! Retry policy for failed executions.
//!
//! A job's `retries` counter counts failed attempts. After the failure that
//! brings it to `n`, the job is rescheduled if `n <= max_retries` and
//! dead-lettered otherwise, so a job that always fails runs exactly
//! `max_retries + 1` times.

use std::time::Duration;

use deferd_core::config::{BackoffConfig, RetryConfig, MAX_DELAY_SECS};

/// Delay schedule between a failure and the next attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * 2^(retries - 1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn exponential(max_retries: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Exponential { base, max },
        }
    }

    /// Whether a job whose failure count just reached `retries` gets another attempt.
    pub fn should_retry(&self, retries: u32) -> bool {
        retries <= self.max_retries
    }

    /// Delay before the attempt that follows failure number `retries` (1-based).
    pub fn delay_for(&self, retries: u32) -> Duration {
        match &self.backoff {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential { base, max } => {
                let exp = retries.saturating_sub(1).min(31);
                base.checked_mul(1u32 << exp)
                    .map_or(*max, |d| d.min(*max))
            }
        }
    }
}

impl Default for RetryPolicy {
    /// Three retries, two seconds apart.
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        let backoff = match config.backoff {
            BackoffConfig::Fixed { delay_secs } => Backoff::Fixed(secs(delay_secs)),
            BackoffConfig::Exponential {
                base_secs,
                max_secs,
            } => Backoff::Exponential {
                base: secs(base_secs),
                max: secs(max_secs),
            },
        };
        Self {
            max_retries: config.max_retries,
            backoff,
        }
    }
}

/// Seconds to a `Duration`, clamped to `[0, MAX_DELAY_SECS]`. NaN maps to zero.
fn secs(value: f64) -> Duration {
    let clamped = if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, MAX_DELAY_SECS)
    };
    Duration::try_from_secs_f64(clamped).unwrap_or(Duration::ZERO)
}
