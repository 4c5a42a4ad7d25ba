//! Configuration error types.

use thiserror::Error;

/// Configuration loading error.
///
/// Raised only at start-up; the bot refuses to run on any of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("validation failed: {0}")]
    Validation(String),
}
