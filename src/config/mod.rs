//! Configuration types and loading

pub mod loader;
pub mod types;

pub use loader::{load_config, load_from_env};
pub use types::{AppConfig, BrokerConfig, RiskConfig, StakingKind, StopMode, TradingConfig};
