//! Configuration types

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::common::errors::{BotError, Result};
use crate::common::types::DurationUnit;

/// Smallest stake the brokerage accepts
pub const MIN_STAKE: Decimal = dec!(0.35);

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Brokerage connection settings
    #[serde(default)]
    pub broker: BrokerConfig,
    /// What and how to trade
    #[serde(default)]
    pub trading: TradingConfig,
    /// Staking and stop-loss settings
    #[serde(default)]
    pub risk: RiskConfig,
    /// General application settings
    #[serde(default)]
    pub settings: AppSettings,
}

impl AppConfig {
    /// Check the settings a session cannot safely run without
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.broker.api_token.as_deref().map_or(true, str::is_empty) {
            errors.push("broker.api_token is not set".to_string());
        }
        if self.risk.base_stake < MIN_STAKE {
            errors.push(format!("risk.base_stake must be at least {}", MIN_STAKE));
        }
        if self.risk.base_stake > self.trading.min_balance {
            errors.push("risk.base_stake is greater than trading.min_balance".to_string());
        }
        if self.risk.profit_target <= Decimal::ZERO {
            errors.push("risk.profit_target must be greater than zero".to_string());
        }
        if self.risk.loss_limit <= Decimal::ZERO {
            errors.push("risk.loss_limit must be greater than zero".to_string());
        }
        if self.risk.multiplier <= Decimal::ZERO {
            errors.push("risk.multiplier must be greater than zero".to_string());
        }
        if self.broker.heartbeat_interval_ms == 0 || self.broker.silence_threshold_ms == 0 {
            errors.push("broker heartbeat and silence durations must be non-zero".to_string());
        }
        if self.broker.silence_threshold_ms <= self.broker.heartbeat_interval_ms {
            errors.push(
                "broker.silence_threshold_ms must exceed broker.heartbeat_interval_ms".to_string(),
            );
        }
        if self.trading.history_capacity == 0 {
            errors.push("trading.history_capacity must be greater than zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(BotError::Configuration(errors.join("; ")))
        }
    }
}

/// Deriv websocket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Websocket endpoint (without the app_id query)
    #[serde(default = "default_websocket_url")]
    pub websocket_url: String,
    /// Registered application id
    #[serde(default = "default_app_id")]
    pub app_id: String,
    /// API token used for authorization
    #[serde(default)]
    pub api_token: Option<String>,
    /// Transport handshake timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Authorization confirmation timeout
    #[serde(default = "default_authorize_timeout")]
    pub authorize_timeout_ms: u64,
    /// Wait for the first tick after subscribing
    #[serde(default = "default_subscribe_timeout")]
    pub subscribe_timeout_ms: u64,
    /// Keep-alive ping interval
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    /// Inbound silence that forces a reconnect
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold_ms: u64,
    /// First delay before a reconnect attempt
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// Upper bound for the reconnect delay
    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_ms: u64,
    /// Maximum reconnection attempts (0 = infinite)
    #[serde(default)]
    pub max_reconnect_attempts: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            websocket_url: default_websocket_url(),
            app_id: default_app_id(),
            api_token: None,
            connect_timeout_ms: default_connect_timeout(),
            authorize_timeout_ms: default_authorize_timeout(),
            subscribe_timeout_ms: default_subscribe_timeout(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            silence_threshold_ms: default_silence_threshold(),
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_delay_ms: default_max_reconnect_delay(),
            max_reconnect_attempts: 0,
        }
    }
}

impl BrokerConfig {
    /// Endpoint with the app_id query attached
    pub fn endpoint(&self) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.websocket_url)
            .map_err(|e| BotError::Configuration(format!("invalid websocket_url: {}", e)))?;
        url.query_pairs_mut().append_pair("app_id", &self.app_id);
        Ok(url)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn authorize_timeout(&self) -> Duration {
        Duration::from_millis(self.authorize_timeout_ms)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn silence_threshold(&self) -> Duration {
        Duration::from_millis(self.silence_threshold_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }
}

fn default_websocket_url() -> String {
    "wss://ws.binaryws.com/websockets/v3".to_string()
}

fn default_app_id() -> String {
    "1089".to_string()
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_authorize_timeout() -> u64 {
    15_000
}

fn default_subscribe_timeout() -> u64 {
    15_000
}

fn default_heartbeat_interval() -> u64 {
    5_000
}

fn default_silence_threshold() -> u64 {
    30_000
}

fn default_reconnect_delay() -> u64 {
    2_000
}

fn default_max_reconnect_delay() -> u64 {
    60_000
}

/// What to trade and the session-level trading limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Instrument to subscribe to
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Default contract duration
    #[serde(default = "default_duration")]
    pub duration: u32,
    /// Default contract duration unit
    #[serde(default = "default_duration_unit")]
    pub duration_unit: DurationUnit,
    /// Proposal basis ("stake" or "payout")
    #[serde(default = "default_basis")]
    pub basis: String,
    /// Ceiling on trades submitted per UTC day
    #[serde(default = "default_max_trades_per_day")]
    pub max_trades_per_day: u32,
    /// Balance required to start a session
    #[serde(default = "default_min_balance")]
    pub min_balance: Decimal,
    /// Bounded tick history kept by the engine
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// History length required before history-shaped strategies are asked
    #[serde(default = "default_min_history")]
    pub min_history: usize,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            duration: default_duration(),
            duration_unit: default_duration_unit(),
            basis: default_basis(),
            max_trades_per_day: default_max_trades_per_day(),
            min_balance: default_min_balance(),
            history_capacity: default_history_capacity(),
            min_history: default_min_history(),
        }
    }
}

fn default_symbol() -> String {
    "R_100".to_string()
}

fn default_duration() -> u32 {
    1
}

fn default_duration_unit() -> DurationUnit {
    DurationUnit::Ticks
}

fn default_basis() -> String {
    "stake".to_string()
}

fn default_max_trades_per_day() -> u32 {
    100
}

fn default_min_balance() -> Decimal {
    dec!(0.50)
}

fn default_history_capacity() -> usize {
    200
}

fn default_min_history() -> usize {
    30
}

/// Stake progression family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StakingKind {
    /// Constant stake
    Flat,
    /// Multiply on loss, reset on win
    Classic,
    /// Multiply on win, reset on loss
    Inverse,
    /// Add an increment on loss, subtract on win
    Arithmetic,
    /// Walk the 1,1,2,3,5,8,... sequence
    Sequence,
}

impl std::str::FromStr for StakingKind {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "flat" => Ok(StakingKind::Flat),
            "classic" | "martingale" => Ok(StakingKind::Classic),
            "inverse" | "paroli" => Ok(StakingKind::Inverse),
            "arithmetic" | "dalembert" => Ok(StakingKind::Arithmetic),
            "sequence" | "fibonacci" => Ok(StakingKind::Sequence),
            other => Err(BotError::Configuration(format!(
                "unknown staking kind: {}",
                other
            ))),
        }
    }
}

/// Which loss ceiling the stop-loss guard enforces besides the balance floor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    /// Net session loss against `loss_limit`
    Value,
    /// Also halt after `max_consecutive_losses` losses in a row
    ConsecutiveLosses,
}

/// Staking and stop-loss configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_base_stake")]
    pub base_stake: Decimal,
    #[serde(default = "default_staking")]
    pub staking: StakingKind,
    /// Factor used by the classic and inverse progressions
    #[serde(default = "default_multiplier")]
    pub multiplier: Decimal,
    /// Step used by the arithmetic progression
    #[serde(default = "default_increment")]
    pub increment: Decimal,
    /// Step cap for the classic, inverse and arithmetic progressions
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Step cap for the sequence progression
    #[serde(default = "default_sequence_max_steps")]
    pub sequence_max_steps: u32,
    /// Stop-gain: net profit that ends the session
    #[serde(default = "default_profit_target")]
    pub profit_target: Decimal,
    /// Stop-loss: net loss that ends the session
    #[serde(default = "default_loss_limit")]
    pub loss_limit: Decimal,
    /// Balance at or below which trading is refused
    #[serde(default)]
    pub balance_floor: Decimal,
    #[serde(default = "default_stop_mode")]
    pub stop_mode: StopMode,
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            base_stake: default_base_stake(),
            staking: default_staking(),
            multiplier: default_multiplier(),
            increment: default_increment(),
            max_steps: default_max_steps(),
            sequence_max_steps: default_sequence_max_steps(),
            profit_target: default_profit_target(),
            loss_limit: default_loss_limit(),
            balance_floor: Decimal::ZERO,
            stop_mode: default_stop_mode(),
            max_consecutive_losses: default_max_consecutive_losses(),
        }
    }
}

fn default_base_stake() -> Decimal {
    dec!(0.35)
}

fn default_staking() -> StakingKind {
    StakingKind::Classic
}

fn default_multiplier() -> Decimal {
    dec!(2.0)
}

fn default_increment() -> Decimal {
    dec!(1.0)
}

fn default_max_steps() -> u32 {
    3
}

fn default_sequence_max_steps() -> u32 {
    10
}

fn default_profit_target() -> Decimal {
    dec!(2.0)
}

fn default_loss_limit() -> Decimal {
    dec!(5.0)
}

fn default_stop_mode() -> StopMode {
    StopMode::Value
}

fn default_max_consecutive_losses() -> u32 {
    5
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
