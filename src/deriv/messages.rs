//! Deriv websocket message types
//!
//! Requests are plain JSON objects whose first key names the call
//! (`{"ticks": "R_100", "subscribe": 1}`); responses carry a `msg_type`
//! discriminator and an optional `error` object.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::common::errors::Result;
use crate::common::types::{ContractStatus, ContractType, DurationUnit, TickRecord, TradeRequest};

/// Outgoing request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Request {
    Authorize(AuthorizeRequest),
    Balance(BalanceRequest),
    Ticks(TicksRequest),
    Proposal(ProposalRequest),
    Buy(BuyRequest),
    OpenContract(OpenContractRequest),
    Ping(PingRequest),
}

impl Request {
    pub fn authorize(token: &str) -> Self {
        Request::Authorize(AuthorizeRequest {
            authorize: token.to_string(),
        })
    }

    pub fn balance_stream() -> Self {
        Request::Balance(BalanceRequest {
            balance: 1,
            subscribe: 1,
        })
    }

    pub fn ticks(symbol: &str) -> Self {
        Request::Ticks(TicksRequest {
            ticks: symbol.to_string(),
            subscribe: 1,
        })
    }

    pub fn proposal(request: &TradeRequest, basis: &str, currency: &str) -> Self {
        Request::Proposal(ProposalRequest {
            proposal: 1,
            amount: request.amount,
            basis: basis.to_string(),
            contract_type: request.contract_type,
            currency: currency.to_string(),
            duration: request.duration,
            duration_unit: request.duration_unit,
            symbol: request.symbol.clone(),
            barrier: request.barrier.clone(),
        })
    }

    pub fn buy(proposal_id: &str, price: Decimal) -> Self {
        Request::Buy(BuyRequest {
            buy: proposal_id.to_string(),
            price,
        })
    }

    pub fn open_contract(contract_id: u64) -> Self {
        Request::OpenContract(OpenContractRequest {
            proposal_open_contract: 1,
            contract_id: Some(contract_id),
            subscribe: 1,
        })
    }

    /// Every contract still open on the account; an empty payload means none.
    pub fn open_contracts() -> Self {
        Request::OpenContract(OpenContractRequest {
            proposal_open_contract: 1,
            contract_id: None,
            subscribe: 1,
        })
    }

    pub fn ping() -> Self {
        Request::Ping(PingRequest { ping: 1 })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthorizeRequest {
    pub authorize: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceRequest {
    pub balance: u8,
    pub subscribe: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TicksRequest {
    pub ticks: String,
    pub subscribe: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProposalRequest {
    pub proposal: u8,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub basis: String,
    pub contract_type: ContractType,
    pub currency: String,
    pub duration: u32,
    pub duration_unit: DurationUnit,
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barrier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuyRequest {
    pub buy: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenContractRequest {
    pub proposal_open_contract: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<u64>,
    pub subscribe: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PingRequest {
    pub ping: u8,
}

/// Error object attached to a failed response
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// `authorize` payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthorizeInfo {
    pub balance: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub loginid: Option<String>,
    #[serde(default)]
    pub is_virtual: Option<u8>,
}

fn default_currency() -> String {
    "USD".to_string()
}

/// `balance` payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BalanceInfo {
    pub balance: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
}

/// `tick` payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TickInfo {
    pub symbol: String,
    pub quote: Decimal,
    pub epoch: i64,
}

impl TickInfo {
    pub fn into_record(self) -> TickRecord {
        let timestamp = DateTime::<Utc>::from_timestamp(self.epoch, 0).unwrap_or_else(Utc::now);
        TickRecord::new(self.symbol, self.quote, timestamp)
    }
}

/// `proposal` payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProposalInfo {
    pub id: String,
    pub ask_price: Decimal,
    #[serde(default)]
    pub payout: Option<Decimal>,
}

/// The parts of a proposal's `echo_req` used to validate a quote
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProposalEcho {
    #[serde(default)]
    pub contract_type: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
}

/// `buy` payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BuyInfo {
    pub contract_id: u64,
    pub buy_price: Decimal,
    #[serde(default)]
    pub balance_after: Option<Decimal>,
    #[serde(default)]
    pub transaction_id: Option<u64>,
}

/// `proposal_open_contract` payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OpenContractInfo {
    #[serde(default)]
    pub contract_id: Option<u64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub profit: Option<Decimal>,
    #[serde(default)]
    pub buy_price: Option<Decimal>,
}

impl OpenContractInfo {
    /// Map the brokerage status onto won/lost/pending.
    ///
    /// A contract sold before expiry resolves by the sign of its profit.
    pub fn resolution(&self) -> ContractStatus {
        let profit = self.profit.unwrap_or_default();
        match self.status.as_deref() {
            Some("won") => ContractStatus::Won,
            Some("lost") => ContractStatus::Lost,
            Some("sold") if profit > Decimal::ZERO => ContractStatus::Won,
            Some("sold") => ContractStatus::Lost,
            _ => ContractStatus::Pending,
        }
    }
}

/// Parsed inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Authorize(std::result::Result<AuthorizeInfo, ApiError>),
    Balance(BalanceInfo),
    Tick(std::result::Result<TickInfo, ApiError>),
    Proposal {
        result: std::result::Result<ProposalInfo, ApiError>,
        echo: ProposalEcho,
    },
    Buy(std::result::Result<BuyInfo, ApiError>),
    OpenContract(std::result::Result<OpenContractInfo, ApiError>),
    Pong,
    /// Anything else, including errors on streams we do not act on
    Other { msg_type: String, error: Option<ApiError> },
}

/// Parse a text frame into an `Inbound` message
pub fn parse_inbound(text: &str) -> Result<Inbound> {
    let mut value: serde_json::Value = serde_json::from_str(text)?;

    let msg_type = value
        .get("msg_type")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let error: Option<ApiError> = match value.get_mut("error").map(serde_json::Value::take) {
        Some(err) => Some(serde_json::from_value(err)?),
        None => None,
    };

    let mut payload = |key: &str| value.get_mut(key).map(serde_json::Value::take);

    let inbound = match msg_type.as_str() {
        "authorize" => Inbound::Authorize(match error {
            Some(err) => Err(err),
            None => Ok(required(payload("authorize"), "authorize")?),
        }),
        "balance" if error.is_none() => Inbound::Balance(required(payload("balance"), "balance")?),
        "tick" => Inbound::Tick(match error {
            Some(err) => Err(err),
            None => Ok(required(payload("tick"), "tick")?),
        }),
        "proposal" => {
            let echo = match payload("echo_req") {
                Some(echo) => serde_json::from_value(echo).unwrap_or_default(),
                None => ProposalEcho::default(),
            };
            let result = match error {
                Some(err) => Err(err),
                None => Ok(required(payload("proposal"), "proposal")?),
            };
            Inbound::Proposal { result, echo }
        }
        "buy" => Inbound::Buy(match error {
            Some(err) => Err(err),
            None => Ok(required(payload("buy"), "buy")?),
        }),
        "proposal_open_contract" => Inbound::OpenContract(match error {
            Some(err) => Err(err),
            None => Ok(required(
                payload("proposal_open_contract"),
                "proposal_open_contract",
            )?),
        }),
        "ping" if error.is_none() => Inbound::Pong,
        _ => Inbound::Other {
            msg_type: msg_type.clone(),
            error,
        },
    };

    Ok(inbound)
}

fn required<T: serde::de::DeserializeOwned>(value: Option<serde_json::Value>, key: &str) -> Result<T> {
    match value {
        Some(v) => Ok(serde_json::from_value(v)?),
        None => Err(crate::common::errors::BotError::InvalidResponse(format!(
            "missing `{}` payload",
            key
        ))),
    }
}
