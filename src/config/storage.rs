//! Storage configuration.

use serde::Deserialize;

/// Position state and trade journal locations.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the JSON position state file (default: "state/positions.json").
    pub positions_path: Option<String>,
    /// Path to the SQLite trade journal (default: "state/trades.db").
    pub trades_path: Option<String>,
    /// Whether closed trades are journaled (default: true).
    #[serde(default = "default_true")]
    pub journal_enabled: bool,
}

fn default_true() -> bool {
    true
}
