//! Trading session orchestration
//!
//! - `session`: the TradingEngine state machine and its event loop
//! - `handle`: stop/observe a session from another task
//! - `registry`: named sessions, each on its own task

pub mod handle;
pub mod registry;
pub mod session;

pub use handle::{EngineState, SessionHandle};
pub use registry::SessionRegistry;
pub use session::{SessionSummary, TradingEngine};
