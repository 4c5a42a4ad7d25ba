//! Bot error types.

use crate::lifecycle::LifecycleError;

/// Bot error type.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("bot is already running")]
    AlreadyRunning,
    #[error("exchange error: {0}")]
    Exchange(String),
    #[error("storage error: {0}")]
    Storage(String),
    /// Local state no longer matches the venue; trading must stop.
    #[error("fatal: {0}")]
    Fatal(#[from] LifecycleError),
}
