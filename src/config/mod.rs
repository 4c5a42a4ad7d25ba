//! Configuration loading and validation for the trading bot.
//!
//! Uses serde_yaml to load YAML configuration files with support for
//! environment variable overrides for sensitive credentials.

mod app;
mod duration;
mod error;
mod exchange;
mod execution;
mod notification;
mod risk;
mod scan;
mod screener;
mod storage;
mod strategy;

pub use app::AppConfig;
pub use error::ConfigError;
pub use exchange::ExchangeConfig;
pub use execution::{ExecutionConfig, RetryConfig};
pub use notification::{NotificationConfig, TelegramConfig};
pub use risk::RiskConfig;
pub use scan::ScanConfig;
pub use screener::ScreenerConfig;
pub use storage::StorageConfig;
pub use strategy::{DcaConfig, DcaLevelConfig, OffsetMode, OffsetRule, StrategyConfig};

use rust_decimal::Decimal;
use serde::Deserialize;
use std::{env, fs};

/// Root configuration structure for the trading bot.
///
/// Required sections: app, exchange, pairs, strategy, risk.
/// Optional sections: screener, execution, scan, notification, storage.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Application-level settings like name and environment.
    pub app: AppConfig,
    /// Trading venue settings.
    pub exchange: ExchangeConfig,
    /// Screening universe (e.g., "BTC/USDT").
    pub pairs: Vec<String>,
    /// Candidate screening (optional).
    pub screener: Option<ScreenerConfig>,
    /// Stop, take-profit, trailing and DCA parameters.
    pub strategy: StrategyConfig,
    /// Risk budget, breaker and liquidity limits.
    pub risk: RiskConfig,
    /// Exchange call timeouts and persistence retries (optional).
    pub execution: Option<ExecutionConfig>,
    /// Scan loop scheduling (optional).
    pub scan: Option<ScanConfig>,
    /// Alert channels like Telegram (optional).
    pub notification: Option<NotificationConfig>,
    /// Position state and trade journal (optional).
    pub storage: Option<StorageConfig>,
}

impl Config {
    /// Load configuration from a YAML file at the given path.
    ///
    /// First loads environment variables from `.env` file (if exists),
    /// then loads YAML config and credentials from environment variables:
    /// - `{EXCHANGE}_API_KEY`, `{EXCHANGE}_API_SECRET`
    /// - `TELEGRAM_BOT_TOKEN`, `TELEGRAM_CHAT_ID`, `TELEGRAM_ERROR_CHAT_ID`
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore error if not found)
        dotenvy::dotenv().ok();

        let content = fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&content)?;

        config.load_credentials_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load credentials from environment variables.
    fn load_credentials_from_env(&mut self) {
        if self.exchange.enabled {
            let env_prefix = self.exchange.name.to_uppercase();
            self.exchange.api_key = env::var(format!("{}_API_KEY", env_prefix)).unwrap_or_default();
            self.exchange.api_secret =
                env::var(format!("{}_API_SECRET", env_prefix)).unwrap_or_default();
        }

        if let Some(ref mut notification) = self.notification {
            if let Some(ref mut telegram) = notification.telegram {
                if telegram.enabled {
                    telegram.bot_token = env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default();
                    telegram.chat_id = env::var("TELEGRAM_CHAT_ID").unwrap_or_default();
                    telegram.error_chat_id = env::var("TELEGRAM_ERROR_CHAT_ID").unwrap_or_default();
                }
            }
        }
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.app.name.is_empty() {
            return Err(ConfigError::Validation("app.name is required".into()));
        }

        if self.pairs.is_empty() {
            return Err(ConfigError::Validation(
                "at least one trading pair is required".into(),
            ));
        }

        if !self.exchange.enabled {
            return Err(ConfigError::Validation("exchange must be enabled".into()));
        }

        // Dry-run still reads market data, but never signs order requests.
        let is_production = self.app.env != "development";
        if is_production
            && !self.app.dry_run
            && (self.exchange.api_key.is_empty() || self.exchange.api_secret.is_empty())
        {
            return Err(ConfigError::Validation(format!(
                "exchange {}: API credentials not found (set {}_API_KEY and {}_API_SECRET env vars)",
                self.exchange.name,
                self.exchange.name.to_uppercase(),
                self.exchange.name.to_uppercase()
            )));
        }

        self.validate_risk()?;
        self.validate_strategy()?;

        Ok(())
    }

    fn validate_risk(&self) -> Result<(), ConfigError> {
        let risk = &self.risk;

        if risk.risk_per_trade <= Decimal::ZERO || risk.risk_per_trade > Decimal::ONE {
            return Err(ConfigError::Validation(
                "risk.risk_per_trade must be in (0, 1]".into(),
            ));
        }

        if risk.max_daily_loss <= Decimal::ZERO {
            return Err(ConfigError::Validation(
                "risk.max_daily_loss must be positive".into(),
            ));
        }

        if risk.losing_streak_threshold == 0 {
            return Err(ConfigError::Validation(
                "risk.losing_streak_threshold must be positive".into(),
            ));
        }

        if risk.max_open_positions == 0 {
            return Err(ConfigError::Validation(
                "risk.max_open_positions must be positive".into(),
            ));
        }

        if risk.fee_rate < Decimal::ZERO {
            return Err(ConfigError::Validation(
                "risk.fee_rate must not be negative".into(),
            ));
        }

        Ok(())
    }

    fn validate_strategy(&self) -> Result<(), ConfigError> {
        let strategy = &self.strategy;

        if strategy.stop.value <= Decimal::ZERO {
            return Err(ConfigError::Validation(
                "strategy.stop.value must be positive".into(),
            ));
        }

        if strategy.stop.mode == OffsetMode::Percent && strategy.stop.value >= Decimal::ONE {
            return Err(ConfigError::Validation(
                "strategy.stop.value must be below 1 in percent mode".into(),
            ));
        }

        if strategy.take_profit.value <= Decimal::ZERO {
            return Err(ConfigError::Validation(
                "strategy.take_profit.value must be positive".into(),
            ));
        }

        if let Some(ref trailing) = strategy.trailing {
            if trailing.value <= Decimal::ZERO {
                return Err(ConfigError::Validation(
                    "strategy.trailing.value must be positive".into(),
                ));
            }
        }

        if let Some(ref dca) = strategy.dca {
            for (i, level) in dca.levels.iter().enumerate() {
                if level.offset <= Decimal::ZERO || level.allocation <= Decimal::ZERO {
                    return Err(ConfigError::Validation(format!(
                        "strategy.dca.levels[{}]: offset and allocation must be positive",
                        i
                    )));
                }
            }
        }

        Ok(())
    }
}
