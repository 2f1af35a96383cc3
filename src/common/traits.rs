//! Trait definitions for brokerage clients

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::errors::Result;
use super::types::{AccountSnapshot, ConnectionState, TradeRequest};

/// Interface the trading engine drives a brokerage through.
///
/// Lifecycle operations are async and bounded by timeouts. The trading
/// operations (`request_trade`, `track_contract`) are synchronous and only
/// enqueue a message, so they are safe to call from inside event handling
/// without stalling the I/O task. Results of those requests come back later
/// as `BrokerEvent`s.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Open the transport and wait for the handshake
    async fn connect(&self) -> Result<()>;

    /// Authorize with an API token; returns the account balance and currency
    async fn authorize(&self, credential: &str) -> Result<AccountSnapshot>;

    /// Register for ticks on a symbol, remembered for re-subscription
    async fn subscribe_ticks(&self, symbol: &str) -> Result<()>;

    /// Close the transport and stop any automatic reconnection
    async fn disconnect(&self) -> Result<()>;

    /// Current connection state
    fn state(&self) -> ConnectionState;

    /// Last known account balance
    fn balance(&self) -> Decimal;

    /// Ask for a quote; the quote is accepted automatically on arrival
    fn request_trade(&self, request: &TradeRequest) -> Result<()>;

    /// Subscribe to lifecycle updates of a purchased contract
    fn track_contract(&self, contract_id: u64) -> Result<()>;
}
