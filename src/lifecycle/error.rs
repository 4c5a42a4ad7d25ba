//! Lifecycle error types.

use std::fmt;

use thiserror::Error;

/// The lifecycle operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Enter,
    Manage,
    Exit,
    Add,
    Reconcile,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Enter => write!(f, "enter"),
            Operation::Manage => write!(f, "manage"),
            Operation::Exit => write!(f, "exit"),
            Operation::Add => write!(f, "add"),
            Operation::Reconcile => write!(f, "reconcile"),
        }
    }
}

/// Lifecycle errors. Every variant names the symbol and the failed operation.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The venue refused the order; nothing changed.
    #[error("{op} {symbol} rejected: {reason}")]
    Rejected {
        symbol: String,
        op: Operation,
        reason: String,
    },

    /// A reconciliation read failed; the symbol stays excluded.
    #[error("{op} {symbol} transport failure: {reason}")]
    Transport {
        symbol: String,
        op: Operation,
        reason: String,
    },

    /// The order outcome is unknown until the next reconciliation.
    #[error("{op} {symbol} outcome unknown, awaiting reconciliation")]
    Unreconciled { symbol: String, op: Operation },

    /// A confirmed fill could not be persisted after all retries.
    #[error("{op} {symbol} filled but position state could not be saved: {reason}")]
    Persistence {
        symbol: String,
        op: Operation,
        reason: String,
    },

    /// A market-data or account read failed before any order was sent.
    #[error("{op} {symbol} exchange error: {reason}")]
    Exchange {
        symbol: String,
        op: Operation,
        reason: String,
    },
}

impl LifecycleError {
    /// True if the bot must stop: local state no longer matches the venue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LifecycleError::Persistence { .. })
    }

    pub fn symbol(&self) -> &str {
        match self {
            LifecycleError::Rejected { symbol, .. }
            | LifecycleError::Transport { symbol, .. }
            | LifecycleError::Unreconciled { symbol, .. }
            | LifecycleError::Persistence { symbol, .. }
            | LifecycleError::Exchange { symbol, .. } => symbol,
        }
    }
}
