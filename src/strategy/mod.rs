//! Strategy module for signal generation
//!
//! Strategies come in two shapes and are evaluated through one interface.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Tick arrives (engine event loop, sync)                     │
//! │       │                                                     │
//! │       ▼                                                     │
//! │  TickHistory.push()  (bounded, oldest evicted first)        │
//! │       │                                                     │
//! │       ▼                                                     │
//! │  SignalSource.evaluate(history) → Option<Signal>            │
//! │       │                                                     │
//! │       ├── HistoryAdapter → HistoryStrategy.produce_signal   │
//! │       └── EntryAdapter   → EntryStrategy.should_enter       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`Signal`]: direction, confidence in [0, 1], optional [`ContractParams`]
//! - [`HistoryStrategy`]: reads the engine's [`TickHistory`]
//! - [`EntryStrategy`]: sees only the newest tick and keeps its own state
//! - [`SignalSource`]: what the engine calls; picked once at construction

mod builtin;
mod history;
mod traits;
mod types;

pub use builtin::{build_strategy, BalancedReversion, Cadence, StrategyKind, TrendFollower};

pub use history::{TickHistory, Trend};

pub use traits::{
    from_entry, from_history, BoxedSignalSource, Entry, EntryAdapter, EntryStrategy,
    HistoryAdapter, HistoryStrategy, SignalSource,
};

pub use types::{ContractParams, Direction, Signal};
