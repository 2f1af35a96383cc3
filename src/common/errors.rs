//! Error types for the application

use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our BotError
pub type Result<T> = std::result::Result<T, BotError>;

/// Which brokerage request a server-side rejection refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
    Ticks,
    Proposal,
    Buy,
    Contract,
}

impl std::fmt::Display for RequestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStage::Ticks => write!(f, "ticks"),
            RequestStage::Proposal => write!(f, "proposal"),
            RequestStage::Buy => write!(f, "buy"),
            RequestStage::Contract => write!(f, "contract"),
        }
    }
}

/// Main error type for broker and session operations
#[derive(Error, Debug)]
pub enum BotError {
    /// WebSocket connection errors
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    /// WebSocket send/receive errors
    #[error("WebSocket communication error: {0}")]
    WebSocketCommunication(String),

    /// JSON serialization/deserialization errors
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Transport handshake did not complete in time
    #[error("Connection timed out after {0:?}")]
    ConnectionTimeout(Duration),

    /// No authorization confirmation arrived in time
    #[error("Authorization timed out after {0:?}")]
    AuthorizationTimeout(Duration),

    /// No tick arrived in time after subscribing
    #[error("Tick subscription for {symbol} timed out after {after:?}")]
    SubscriptionTimeout { symbol: String, after: Duration },

    /// The brokerage refused the credential
    #[error("Authorization rejected ({code}): {message}")]
    AuthorizationRejected { code: String, message: String },

    /// Operation needs a live transport
    #[error("Not connected to the brokerage")]
    NotConnected,

    /// Brokerage-reported request errors (subscription, quote or purchase refused)
    #[error("Brokerage rejected {stage} request ({code}): {message}")]
    BrokerRejected {
        stage: RequestStage,
        code: String,
        message: String,
    },

    /// Account balance is below what the session needs to start
    #[error("Insufficient balance: {balance} is below the required {required}")]
    InsufficientBalance { balance: Decimal, required: Decimal },

    /// Reconnect sequence gave up
    #[error("Reconnection failed after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// Operation not valid in the current session/link state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid API response
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Channel send errors
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BotError {
    /// Transport-level failures are recovered by the reconnect sequence
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            BotError::WebSocketConnection(_)
                | BotError::WebSocketCommunication(_)
                | BotError::ConnectionTimeout(_)
                | BotError::SubscriptionTimeout { .. }
                | BotError::NotConnected
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BotError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        BotError::WebSocketCommunication(err.to_string())
    }
}

/// Fault raised while a strategy evaluates a tick
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrategyError {
    #[error("not enough data: need {needed} ticks, have {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("numeric fault: {0}")]
    Numeric(String),

    #[error("strategy panicked: {0}")]
    Panicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(BotError::NotConnected.is_transport());
        assert!(BotError::ConnectionTimeout(Duration::from_secs(10)).is_transport());
        assert!(!BotError::AuthorizationRejected {
            code: "InvalidToken".into(),
            message: "The token is invalid.".into(),
        }
        .is_transport());
        assert!(!BotError::BrokerRejected {
            stage: RequestStage::Ticks,
            code: "InvalidSymbol".into(),
            message: "Symbol R_999 is invalid.".into(),
        }
        .is_transport());
    }

    #[test]
    fn test_rejection_message() {
        let err = BotError::BrokerRejected {
            stage: RequestStage::Buy,
            code: "InsufficientBalance".into(),
            message: "Your account balance is insufficient".into(),
        };
        assert_eq!(
            err.to_string(),
            "Brokerage rejected buy request (InsufficientBalance): Your account balance is insufficient"
        );
    }
}
