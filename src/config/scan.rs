//! Scan loop configuration.

use serde::Deserialize;
use std::time::Duration;

use super::duration;

/// Scan loop scheduling settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Pause between evaluation passes (default: 60s).
    #[serde(default, with = "duration")]
    pub interval: Duration,
    /// Interval between overview notifications (default: 1h).
    #[serde(default, with = "duration")]
    pub overview_interval: Duration,
}
