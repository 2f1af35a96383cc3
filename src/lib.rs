//! Binary Trader Library
//!
//! An automated binary-options trading session for the Deriv real-time API:
//! a persistent websocket link, a tick-driven trading engine, staking
//! progressions and session stop rules.

pub mod common;
pub mod config;
pub mod deriv;
pub mod engine;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use common::errors::{BotError, RequestStage, Result, StrategyError};
pub use common::traits::BrokerSession;
pub use common::types::{
    AccountSnapshot, BrokerEvent, ConnectionState, ContractStatus, ContractType, ContractUpdate,
    DurationUnit, TickRecord, TradeRequest,
};
pub use config::types::AppConfig;
pub use deriv::BrokerLink;
pub use engine::{EngineState, SessionHandle, SessionRegistry, SessionSummary, TradingEngine};

// Risk types
pub use risk::{
    build_policy, BoxedStakingPolicy, SessionStats, StakeInfo, StakingPolicy, StopLossGuard,
    StopReason, Verdict,
};

// Strategy types
pub use strategy::{
    build_strategy, BoxedSignalSource, ContractParams, Direction, EntryStrategy, HistoryStrategy,
    Signal, SignalSource, StrategyKind, TickHistory,
};
