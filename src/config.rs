use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::coordinator::ScheduleConfig;
use crate::domain::LabelRule;
use crate::error::{CandlebotError, Result};
use crate::ml::PredictorConfig;
use crate::rl::PolicyConfig;
use crate::strategy::SignalConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub feed: FeedConfig,
    /// How stored candles are labeled for training
    pub labeling: LabelRule,
    pub predictor: PredictorConfig,
    pub policy: PolicyConfig,
    pub signal: SignalConfig,
    pub schedule: ScheduleConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub candle_store: PathBuf,
    pub model: PathBuf,
    pub trade_log: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            candle_store: PathBuf::from("data/candlestick_data.csv"),
            model: PathBuf::from("models/candlestick_model.json"),
            trade_log: PathBuf::from("logs/trade_log.csv"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Connect to the market data feed on `run`
    pub enabled: bool,
    /// WebSocket endpoint base for market data
    pub ws_url: String,
    pub symbol: String,
    /// Binance kline interval
    pub interval: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ws_url: "wss://stream.binance.com:9443".to_string(),
            symbol: "BTCUSDT".to_string(),
            interval: "1m".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON formatted logs
    pub json: bool,
    /// Directory for the daily rolling log file
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            dir: PathBuf::from("logs"),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> std::result::Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();
        let env = std::env::var("CANDLEBOT_ENV").unwrap_or_else(|_| "development".to_string());

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("schedule.timezone", "Africa/Tunis")?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(File::from(config_dir.join(format!("{env}.toml"))).required(false))
            // Override with environment variables (CANDLEBOT_POLICY__EXPLORATION_RATE, etc.)
            .add_source(
                Environment::with_prefix("CANDLEBOT")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.schedule.timezone.parse::<Tz>().map_err(|e| {
            CandlebotError::Validation(format!(
                "unknown time zone '{}': {e}",
                self.schedule.timezone
            ))
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Err(e) = self.policy.validate() {
            errors.extend(e);
        }
        if let Err(e) = self.signal.validate() {
            errors.extend(e);
        }

        let p = &self.predictor;
        if p.window_len < 2 {
            errors.push("predictor.window_len must be at least 2".to_string());
        }
        if p.epochs == 0 || p.batch_size == 0 || p.hidden_units == 0 {
            errors.push("predictor.epochs, batch_size and hidden_units must be positive".to_string());
        }
        if !(0.0..1.0).contains(&p.validation_split) {
            errors.push("predictor.validation_split must be in [0, 1)".to_string());
        }
        if !(p.learning_rate > 0.0 && p.learning_rate.is_finite()) {
            errors.push("predictor.learning_rate must be positive".to_string());
        }

        if self.schedule.retrain_every_ticks == 0 {
            errors.push("schedule.retrain_every_ticks must be at least 1".to_string());
        }
        if let Err(e) = self.timezone() {
            errors.push(e.to_string());
        }

        if self.feed.enabled && self.feed.symbol.trim().is_empty() {
            errors.push("feed.symbol must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
