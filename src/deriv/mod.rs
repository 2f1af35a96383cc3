//! Deriv brokerage integration
//!
//! - `messages`: request builders and inbound message parsing
//! - `link`: the persistent websocket link with heartbeat and reconnect

pub mod link;
pub mod messages;

pub use link::BrokerLink;
