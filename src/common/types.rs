//! Unified types shared by the broker link, the engine and the strategies

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::errors::RequestStage;

/// Lifecycle of the brokerage connection
///
/// Ordering is meaningful: each variant is "further along" than the ones
/// before it, so `state >= ConnectionState::Connected` means a live transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Authorized,
    Subscribed,
}

impl ConnectionState {
    /// Whether a transport is open
    pub fn is_open(&self) -> bool {
        *self >= ConnectionState::Connected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Authorized => write!(f, "authorized"),
            ConnectionState::Subscribed => write!(f, "subscribed"),
        }
    }
}

/// One timestamped price observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    /// Brokerage epoch of the quote
    pub timestamp: DateTime<Utc>,
    /// Instrument symbol (e.g. R_100)
    pub symbol: String,
    /// Quoted price
    pub quote: Decimal,
}

impl TickRecord {
    pub fn new(symbol: impl Into<String>, quote: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            symbol: symbol.into(),
            quote,
        }
    }
}

/// Account details captured on authorization and kept current by the balance stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub login_id: Option<String>,
    pub balance: Decimal,
    pub currency: String,
    pub is_virtual: bool,
}

impl Default for AccountSnapshot {
    fn default() -> Self {
        Self {
            login_id: None,
            balance: Decimal::ZERO,
            currency: "USD".to_string(),
            is_virtual: false,
        }
    }
}

/// Brokerage contract types the engine can submit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContractType {
    Call,
    Put,
    DigitOver,
    DigitUnder,
    DigitMatch,
    DigitDiff,
    DigitEven,
    DigitOdd,
}

impl ContractType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractType::Call => "CALL",
            ContractType::Put => "PUT",
            ContractType::DigitOver => "DIGITOVER",
            ContractType::DigitUnder => "DIGITUNDER",
            ContractType::DigitMatch => "DIGITMATCH",
            ContractType::DigitDiff => "DIGITDIFF",
            ContractType::DigitEven => "DIGITEVEN",
            ContractType::DigitOdd => "DIGITODD",
        }
    }
}

impl std::fmt::Display for ContractType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contract duration unit as understood by the brokerage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DurationUnit {
    #[serde(rename = "t")]
    Ticks,
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "m")]
    Minutes,
    #[serde(rename = "h")]
    Hours,
    #[serde(rename = "d")]
    Days,
}

impl std::fmt::Display for DurationUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let unit = match self {
            DurationUnit::Ticks => "t",
            DurationUnit::Seconds => "s",
            DurationUnit::Minutes => "m",
            DurationUnit::Hours => "h",
            DurationUnit::Days => "d",
        };
        f.write_str(unit)
    }
}

/// A prospective contract the engine asks the brokerage to quote and buy
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRequest {
    pub contract_type: ContractType,
    pub symbol: String,
    pub amount: Decimal,
    pub duration: u32,
    pub duration_unit: DurationUnit,
    pub barrier: Option<String>,
}

/// Resolution status of a submitted contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    Pending,
    Won,
    Lost,
}

impl ContractStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ContractStatus::Pending)
    }
}

/// A lifecycle update for a tracked contract
#[derive(Debug, Clone, PartialEq)]
pub struct ContractUpdate {
    pub contract_id: u64,
    pub status: ContractStatus,
    pub profit: Decimal,
}

/// Events BrokerLink delivers to its consumer, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// New price observation for the subscribed symbol
    Tick(TickRecord),
    /// Balance stream update
    Balance(Decimal),
    /// A quote was accepted and the purchase went through
    ContractOpened { contract_id: u64, buy_price: Decimal },
    /// Status change of a tracked contract
    ContractUpdated(ContractUpdate),
    /// Quote or purchase refused (by the brokerage or by quote validation)
    RequestRejected {
        stage: RequestStage,
        code: String,
        message: String,
    },
    /// Connection state transition
    ConnectionStatus(ConnectionState),
    /// Reconnect budget exhausted or credential refused while recovering
    ConnectionLost { reason: String, attempts: u32 },
}
