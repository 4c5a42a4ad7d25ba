//! Bot configuration.

use crate::config::Config;

/// Bot configuration options.
pub struct BotConfig {
    /// Application configuration.
    pub app_config: Config,
    /// Simulate fills instead of trading on the venue.
    pub dry_run: bool,
    /// Application version.
    pub version: String,
    /// Build timestamp.
    pub build_time: String,
}

impl BotConfig {
    pub fn new(app_config: Config) -> Self {
        Self {
            dry_run: app_config.app.dry_run,
            app_config,
            version: env!("CARGO_PKG_VERSION").to_string(),
            build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
        }
    }
}
