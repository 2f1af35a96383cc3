use serde::{Deserialize, Serialize};

use crate::common::types::{ContractType, DurationUnit};

/// Predicted price direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Rise/fall contract used when a signal names no contract type
    pub fn default_contract(&self) -> ContractType {
        match self {
            Direction::Up => ContractType::Call,
            Direction::Down => ContractType::Put,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// Contract parameters a strategy may pin down
///
/// Any field left `None` falls back to the trading configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractParams {
    pub contract_type: Option<ContractType>,
    pub symbol: Option<String>,
    pub duration: Option<u32>,
    pub duration_unit: Option<DurationUnit>,
    pub barrier: Option<String>,
}

impl ContractParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contract_type(mut self, contract_type: ContractType) -> Self {
        self.contract_type = Some(contract_type);
        self
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_duration(mut self, duration: u32, unit: DurationUnit) -> Self {
        self.duration = Some(duration);
        self.duration_unit = Some(unit);
        self
    }

    pub fn with_barrier(mut self, barrier: impl Into<String>) -> Self {
        self.barrier = Some(barrier.into());
        self
    }
}

/// A strategy's call for one tick
///
/// Ephemeral: the engine turns it into a trade request or drops it.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub direction: Direction,
    /// Always within [0, 1]
    pub confidence: f64,
    pub params: ContractParams,
}

impl Signal {
    /// Create a signal; confidence is clamped to [0, 1] and NaN becomes 0
    pub fn new(direction: Direction, confidence: f64) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            direction,
            confidence,
            params: ContractParams::default(),
        }
    }

    pub fn up(confidence: f64) -> Self {
        Self::new(Direction::Up, confidence)
    }

    pub fn down(confidence: f64) -> Self {
        Self::new(Direction::Down, confidence)
    }

    pub fn with_params(mut self, params: ContractParams) -> Self {
        self.params = params;
        self
    }

    /// Contract type to submit for this signal
    pub fn contract_type(&self) -> ContractType {
        self.params
            .contract_type
            .unwrap_or_else(|| self.direction.default_contract())
    }
}
