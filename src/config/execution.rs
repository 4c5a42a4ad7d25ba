//! Execution configuration.

use serde::Deserialize;
use std::time::Duration;

use super::duration;

/// Exchange call and persistence retry settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Upper bound for every exchange call (default: 10s).
    #[serde(default, with = "duration")]
    pub timeout: Duration,
    /// Backoff used when persisting state after a confirmed fill.
    pub retry: Option<RetryConfig>,
}

/// Retry settings for failed operations.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts.
    pub max_attempts: Option<i32>,
    /// Delay before the first retry.
    #[serde(default, with = "duration")]
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    #[serde(default, with = "duration")]
    pub max_delay: Duration,
    /// Factor by which delay increases after each retry.
    pub multiplier: Option<f64>,
}
