//! PositionStore: the single owner of the open-position set.

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::Position;
use crate::storage::{PersistedState, StateStore, StorageError};

/// PositionStore caches the open positions and mirrors every change to a
/// `StateStore` before it becomes visible.
///
/// Mutations are serialized by an internal lock held across the write, so
/// concurrent callers cannot interleave read-modify-write cycles.
pub struct PositionStore {
    backend: Arc<dyn StateStore>,
    positions: Mutex<BTreeMap<String, Position>>,
}

impl PositionStore {
    pub fn new(backend: Arc<dyn StateStore>) -> Self {
        Self {
            backend,
            positions: Mutex::new(BTreeMap::new()),
        }
    }

    /// Reads the persisted set into memory and returns it.
    ///
    /// Missing or unreadable state yields an empty set: a corrupted file is
    /// treated as "no known positions" and the venue may still hold assets
    /// the bot no longer tracks.
    pub async fn load(&self) -> BTreeMap<String, Position> {
        let loaded = match self.backend.read().await {
            Ok(Some(state)) => state.positions,
            Ok(None) => {
                info!("no position state found, starting flat");
                BTreeMap::new()
            }
            Err(e) => {
                warn!(error = %e, "position state unreadable, starting flat");
                BTreeMap::new()
            }
        };

        let positions: BTreeMap<String, Position> = loaded
            .into_iter()
            .filter(|(symbol, p)| {
                let keep = p.quantity > Decimal::ZERO && *symbol == p.symbol;
                if !keep {
                    warn!(symbol = %symbol, "dropping invalid persisted position");
                }
                keep
            })
            .collect();

        info!(positions = positions.len(), "position state loaded");
        *self.positions.lock().await = positions.clone();
        positions
    }

    /// Returns the position for `symbol`, if open.
    pub async fn get(&self, symbol: &str) -> Option<Position> {
        self.positions.lock().await.get(symbol).cloned()
    }

    /// Returns all open positions ordered by symbol.
    pub async fn all(&self) -> Vec<Position> {
        self.positions.lock().await.values().cloned().collect()
    }

    pub async fn contains(&self, symbol: &str) -> bool {
        self.positions.lock().await.contains_key(symbol)
    }

    pub async fn len(&self) -> usize {
        self.positions.lock().await.len()
    }

    /// Inserts or replaces a position and rewrites the whole set.
    ///
    /// A position with zero quantity is removed instead of stored. The
    /// in-memory set changes only after the write succeeded.
    pub async fn upsert(&self, position: Position) -> Result<(), StorageError> {
        if position.quantity <= Decimal::ZERO {
            self.remove(&position.symbol).await?;
            return Ok(());
        }

        let mut positions = self.positions.lock().await;
        let mut next = positions.clone();
        let symbol = position.symbol.clone();
        next.insert(symbol.clone(), position);

        self.backend
            .write(&PersistedState {
                positions: next.clone(),
            })
            .await?;
        *positions = next;

        debug!(symbol = %symbol, "position upserted");
        Ok(())
    }

    /// Removes a position and rewrites the whole set.
    /// Returns false if the symbol was not held.
    pub async fn remove(&self, symbol: &str) -> Result<bool, StorageError> {
        let mut positions = self.positions.lock().await;
        if !positions.contains_key(symbol) {
            return Ok(false);
        }

        let mut next = positions.clone();
        next.remove(symbol);

        self.backend
            .write(&PersistedState {
                positions: next.clone(),
            })
            .await?;
        *positions = next;

        debug!(symbol = %symbol, "position removed");
        Ok(true)
    }
}
