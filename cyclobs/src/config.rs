//! Configuration.
//!
//! Process settings and credentials come from environment variables.
//! Trading parameters (markets, triggers, thresholds, backtest setup) come
//! from a TOML file that is validated once at startup.

use crate::backtest::StrategyConfig;
use crate::trigger::{ExitTrigger, TriggerDefinition};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Smallest accepted data mode volume filter.
const MIN_VOLUME_FLOOR: Decimal = dec!(1000);
/// Smallest accepted price window retention, in seconds.
const MIN_BUFFER_TIME_SPAN: u64 = 3600;
/// Longest accepted duration setting, in seconds (one year).
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 3600;

/// Process configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the TOML trading configuration
    pub config_path: PathBuf,
    /// Directory for recorded events and price histories
    pub data_dir: PathBuf,
    /// WebSocket URL of the market channel
    pub ws_url: String,
    /// CLOB API base URL
    pub clob_url: String,
    /// Gamma API base URL
    pub gamma_url: String,
    /// Data API base URL
    pub data_api_url: String,
    /// Fixed delay before resubscribing after a disconnect
    pub reconnect_delay_secs: u64,
    /// Log level
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config_path = env::var("CYCLOBS_CONFIG")
            .unwrap_or_else(|_| "configuration/cyclobs.toml".to_string())
            .into();

        let data_dir = env::var("CYCLOBS_DATA_DIR")
            .unwrap_or_else(|_| "data".to_string())
            .into();

        let ws_url = env::var("CYCLOBS_WS_URL")
            .unwrap_or_else(|_| "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string());

        let clob_url = env::var("CYCLOBS_CLOB_URL")
            .unwrap_or_else(|_| "https://clob.polymarket.com".to_string());

        let gamma_url = env::var("CYCLOBS_GAMMA_URL")
            .unwrap_or_else(|_| "https://gamma-api.polymarket.com".to_string());

        let data_api_url = env::var("CYCLOBS_DATA_API_URL")
            .unwrap_or_else(|_| "https://data-api.polymarket.com".to_string());

        let reconnect_delay_secs = env::var("CYCLOBS_RECONNECT_DELAY_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("CYCLOBS_RECONNECT_DELAY_SECS"))?;

        let log_level = env::var("CYCLOBS_LOG_LEVEL")
            .or_else(|_| env::var("RUST_LOG"))
            .unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            config_path,
            data_dir,
            ws_url,
            clob_url,
            gamma_url,
            data_api_url,
            reconnect_delay_secs,
            log_level,
        })
    }
}

/// Exchange credentials. Only needed by modes that place orders or read
/// the account's positions.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Signing key (hex, with or without 0x prefix)
    pub private_key: SecretString,
    /// Proxy wallet that holds funds and positions
    pub proxy_address: String,
    pub api_key: String,
    pub api_secret: SecretString,
    pub api_passphrase: SecretString,
}

impl Credentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        let private_key = env::var("CYCLOBS_PRIVATE_KEY")
            .or_else(|_| env::var("PRIVATE_KEY"))
            .map_err(|_| ConfigError::MissingVar("CYCLOBS_PRIVATE_KEY or PRIVATE_KEY"))?;
        let key = private_key.strip_prefix("0x").unwrap_or(&private_key);
        if key.len() != 64 || hex::decode(key).is_err() {
            return Err(ConfigError::InvalidValue("CYCLOBS_PRIVATE_KEY"));
        }

        let proxy_address = env::var("CYCLOBS_PROXY_ADDRESS")
            .map_err(|_| ConfigError::MissingVar("CYCLOBS_PROXY_ADDRESS"))?;

        let api_key = env::var("CYCLOBS_API_KEY")
            .map_err(|_| ConfigError::MissingVar("CYCLOBS_API_KEY"))?;

        let api_secret = env::var("CYCLOBS_API_SECRET")
            .map_err(|_| ConfigError::MissingVar("CYCLOBS_API_SECRET"))?;

        let api_passphrase = env::var("CYCLOBS_API_PASSPHRASE")
            .map_err(|_| ConfigError::MissingVar("CYCLOBS_API_PASSPHRASE"))?;

        Ok(Self {
            private_key: private_key.into(),
            proxy_address,
            api_key,
            api_secret: api_secret.into(),
            api_passphrase: api_passphrase.into(),
        })
    }
}

/// Trading parameters loaded from the TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TradingConfig {
    #[serde(default)]
    pub data: Option<DataModeConfig>,
    #[serde(default)]
    pub trigger: Option<TriggerModeConfig>,
    #[serde(default)]
    pub jump: Option<JumpConfig>,
    #[serde(default)]
    pub cleaner: Option<CleanerConfig>,
    #[serde(default)]
    pub backtest: Option<BacktestConfig>,
}

/// Market recording with optional windowed entry triggers.
#[derive(Debug, Clone, Deserialize)]
pub struct DataModeConfig {
    pub tag_slugs: Vec<String>,
    /// Extra event slugs subscribed regardless of tags
    #[serde(default)]
    pub events: Vec<String>,
    /// Minimum 24h volume of a discovered market
    pub min_volume: Decimal,
    /// Price window retention in seconds
    pub buffer_time_span: u64,
    /// Entry triggers are blocked at this many open positions
    #[serde(default = "default_position_limit")]
    pub position_limit: usize,
    /// Submit entry orders instead of logging them
    #[serde(default)]
    pub live: bool,
    #[serde(default)]
    pub triggers: Vec<TriggerDefinition>,
}

/// Take-profit / stop-loss management of held positions.
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerModeConfig {
    pub live: bool,
    pub record_data: bool,
    #[serde(default)]
    pub triggers: Vec<ExitTrigger>,
}

/// Jump alert and screener thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct JumpConfig {
    pub threshold1: Decimal,
    pub threshold2: Decimal,
    pub threshold3: Decimal,
    pub spread_limit: Decimal,
    #[serde(default)]
    pub include_tags: Vec<String>,
    #[serde(default)]
    pub exclude_tags: Vec<String>,
}

/// Stale position cleanup.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanerConfig {
    /// Poll interval in seconds
    #[serde(default = "default_cleaner_interval")]
    pub interval: u64,
    /// Age in seconds after which an unchanged position is closed
    pub expiration: u64,
    /// Distance below the current price for the closing limit
    pub limit_offset: Decimal,
}

/// Backtest run setup.
#[derive(Debug, Clone, Deserialize)]
pub struct BacktestConfig {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Abort on a missing price instead of falling back
    #[serde(default = "default_strict")]
    pub strict: bool,
    /// Tags covered by a decay sweep
    #[serde(default)]
    pub sweep_tags: Vec<String>,
    pub strategy: StrategyConfig,
}

fn default_position_limit() -> usize {
    10
}

fn default_cleaner_interval() -> u64 {
    60
}

fn default_strict() -> bool {
    true
}

fn is_probability(value: Decimal) -> bool {
    value > Decimal::ZERO && value < Decimal::ONE
}

impl TradingConfig {
    /// Load and validate the TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Read(format!("{:?}: {}", path.as_ref(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML content.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: TradingConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section that is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(data) = &self.data {
            data.validate()?;
        }
        if let Some(trigger) = &self.trigger {
            trigger.validate()?;
        }
        if let Some(jump) = &self.jump {
            jump.validate()?;
        }
        if let Some(cleaner) = &self.cleaner {
            cleaner.validate()?;
        }
        if let Some(backtest) = &self.backtest {
            backtest.validate()?;
        }
        Ok(())
    }

    pub fn require_data(&self) -> Result<&DataModeConfig, ConfigError> {
        self.data.as_ref().ok_or(ConfigError::MissingSection("data"))
    }

    pub fn require_trigger(&self) -> Result<&TriggerModeConfig, ConfigError> {
        self.trigger.as_ref().ok_or(ConfigError::MissingSection("trigger"))
    }

    pub fn require_jump(&self) -> Result<&JumpConfig, ConfigError> {
        self.jump.as_ref().ok_or(ConfigError::MissingSection("jump"))
    }

    pub fn require_backtest(&self) -> Result<&BacktestConfig, ConfigError> {
        self.backtest.as_ref().ok_or(ConfigError::MissingSection("backtest"))
    }
}

impl DataModeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_volume < MIN_VOLUME_FLOOR {
            return Err(ConfigError::Invalid("data.min_volume must be at least 1000".into()));
        }
        if self.buffer_time_span < MIN_BUFFER_TIME_SPAN {
            return Err(ConfigError::Invalid("data.buffer_time_span must be at least 3600".into()));
        }
        if self.buffer_time_span > MAX_DURATION_SECS {
            return Err(ConfigError::Invalid("data.buffer_time_span can't exceed one year".into()));
        }
        for trigger in &self.triggers {
            let invalid = |what: &str| ConfigError::Invalid(format!("trigger {}: {}", trigger.slug, what));
            if trigger.time_span == 0 || trigger.time_span > self.buffer_time_span {
                return Err(invalid("time_span must be within the buffer time span"));
            }
            if trigger.expiration > MAX_DURATION_SECS {
                return Err(invalid("expiration can't exceed one year"));
            }
            if !is_probability(trigger.min_price) || !is_probability(trigger.max_price) {
                return Err(invalid("price band must lie in (0, 1)"));
            }
            if trigger.min_price >= trigger.max_price {
                return Err(invalid("min_price must be below max_price"));
            }
            if trigger.size <= Decimal::ZERO {
                return Err(invalid("size must be positive"));
            }
            if trigger.liquidity_range.is_some() != trigger.min_liquidity.is_some() {
                return Err(invalid("liquidity_range and min_liquidity go together"));
            }
        }
        Ok(())
    }
}

impl TriggerModeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for trigger in &self.triggers {
            let invalid = |what: &str| ConfigError::Invalid(format!("trigger {}: {}", trigger.slug, what));
            if trigger.slug.is_empty() {
                return Err(ConfigError::Invalid("trigger slug missing".into()));
            }
            if let Some(take_profit) = trigger.take_profit {
                if !is_probability(take_profit) {
                    return Err(invalid("invalid take profit price"));
                }
                if trigger.stop_loss >= take_profit {
                    return Err(invalid("stop loss must be less than take profit"));
                }
                match trigger.take_profit_limit {
                    Some(limit) if is_probability(limit) => {}
                    _ => return Err(invalid("invalid take profit limit")),
                }
            }
            if !is_probability(trigger.stop_loss) {
                return Err(invalid("invalid stop loss price"));
            }
            if !is_probability(trigger.stop_loss_limit) {
                return Err(invalid("invalid stop loss limit"));
            }
        }
        Ok(())
    }
}

impl JumpConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for threshold in [self.threshold1, self.threshold2, self.threshold3] {
            if !is_probability(threshold) {
                return Err(ConfigError::Invalid("jump thresholds must lie in (0, 1)".into()));
            }
        }
        if self.spread_limit < Decimal::ZERO {
            return Err(ConfigError::Invalid("jump.spread_limit can't be negative".into()));
        }
        Ok(())
    }
}

impl CleanerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval == 0 || self.interval > MAX_DURATION_SECS {
            return Err(ConfigError::Invalid("cleaner.interval must be positive and at most one year".into()));
        }
        if self.expiration > MAX_DURATION_SECS {
            return Err(ConfigError::Invalid("cleaner.expiration can't exceed one year".into()));
        }
        if self.limit_offset < Decimal::ZERO || self.limit_offset >= Decimal::ONE {
            return Err(ConfigError::Invalid("cleaner.limit_offset must lie in [0, 1)".into()));
        }
        Ok(())
    }
}

impl BacktestConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.start >= self.end {
            return Err(ConfigError::Invalid("backtest.start must be before backtest.end".into()));
        }
        self.strategy.validate().map_err(ConfigError::Invalid)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for: {0}")]
    InvalidValue(&'static str),

    #[error("Failed to read config file {0}")]
    Read(String),

    #[error("Failed to parse TOML config: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing [{0}] section in configuration")]
    MissingSection(&'static str),
}
