//! Storage interfaces and implementations for positions and closed trades.

mod json;
mod positions;
mod sqlite;

pub use json::JsonFileStore;
pub use positions::PositionStore;
pub use sqlite::{SqliteStorage, SqliteStorageConfig};

use crate::domain::{Position, TradeRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Layout written by a `StateStore`: every open position keyed by symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub positions: BTreeMap<String, Position>,
}

/// StateStore persists the full position set wholesale.
///
/// `write` must be atomic: a concurrent reader sees either the previous set
/// or the new one, never a partial record.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads the last written set. `Ok(None)` when nothing was written yet.
    async fn read(&self) -> Result<Option<PersistedState>, StorageError>;

    /// Replaces the stored set.
    async fn write(&self, state: &PersistedState) -> Result<(), StorageError>;
}

/// TradeJournal is the append-only log of closed trades.
#[async_trait]
pub trait TradeJournal: Send + Sync {
    /// Appends a record. Returns false if the same record was already stored.
    async fn append(&self, record: &TradeRecord) -> Result<bool, StorageError>;

    /// Records closed at or after `since`, oldest first.
    async fn closed_since(&self, since: DateTime<Utc>) -> Result<Vec<TradeRecord>, StorageError>;

    /// Count returns the total number of stored records.
    async fn count(&self) -> Result<i64, StorageError>;

    /// Close closes the storage connection.
    async fn close(&self) -> Result<(), StorageError>;
}

/// StorageError represents errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
