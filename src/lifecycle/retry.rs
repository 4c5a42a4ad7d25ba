//! Exponential backoff for persisting confirmed fills.

use std::time::Duration;

use crate::config::RetryConfig;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(200);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_MULTIPLIER: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

impl From<Option<&RetryConfig>> for RetryPolicy {
    fn from(config: Option<&RetryConfig>) -> Self {
        let defaults = Self::default();
        let Some(c) = config else {
            return defaults;
        };
        Self {
            max_attempts: c
                .max_attempts
                .filter(|n| *n > 0)
                .map(|n| n as u32)
                .unwrap_or(defaults.max_attempts),
            initial_delay: if c.initial_delay.is_zero() {
                defaults.initial_delay
            } else {
                c.initial_delay
            },
            max_delay: if c.max_delay.is_zero() {
                defaults.max_delay
            } else {
                c.max_delay
            },
            multiplier: c
                .multiplier
                .filter(|m| *m >= 1.0)
                .unwrap_or(defaults.multiplier),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), capped at `max_delay`.
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.saturating_sub(1) as i32);
        self.initial_delay.mul_f64(factor).min(self.max_delay)
    }
}
