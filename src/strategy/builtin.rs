//! Reference strategies shipped with the bot

use rust_decimal::prelude::ToPrimitive;
use std::str::FromStr;

use crate::common::errors::{BotError, StrategyError};
use crate::common::types::{DurationUnit, TickRecord};
use crate::config::types::TradingConfig;
use crate::strategy::history::{TickHistory, Trend};
use crate::strategy::traits::{
    from_entry, from_history, BoxedSignalSource, Entry, EntryStrategy, HistoryStrategy,
};
use crate::strategy::types::{ContractParams, Direction, Signal};

/// Built-in strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Trend,
    Balanced,
    Cadence,
}

impl FromStr for StrategyKind {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trend" => Ok(StrategyKind::Trend),
            "balanced" => Ok(StrategyKind::Balanced),
            "cadence" => Ok(StrategyKind::Cadence),
            other => Err(BotError::Configuration(format!("unknown strategy: {}", other))),
        }
    }
}

/// Build a built-in strategy wrapped in its adapter
pub fn build_strategy(kind: StrategyKind, trading: &TradingConfig) -> BoxedSignalSource {
    match kind {
        StrategyKind::Trend => from_history(TrendFollower::default(), trading.min_history),
        StrategyKind::Balanced => from_entry(BalancedReversion::default()),
        StrategyKind::Cadence => from_entry(Cadence::default()),
    }
}

/// Follows short runs in the direction of the prevailing trend
#[derive(Debug, Clone)]
pub struct TrendFollower {
    lookback: usize,
    min_consecutive: usize,
    confidence_threshold: f64,
}

impl TrendFollower {
    pub fn new(lookback: usize, min_consecutive: usize, confidence_threshold: f64) -> Self {
        Self {
            lookback: lookback.max(2),
            min_consecutive,
            confidence_threshold,
        }
    }
}

impl Default for TrendFollower {
    fn default() -> Self {
        Self::new(5, 2, 0.6)
    }
}

impl HistoryStrategy for TrendFollower {
    fn name(&self) -> &str {
        "trend"
    }

    fn produce_signal(&mut self, history: &TickHistory) -> Result<Option<Signal>, StrategyError> {
        let (ups, downs) = history.trailing_run(10);
        let (direction, run) = match history.trend(self.lookback) {
            Trend::Up => (Direction::Up, ups),
            Trend::Down => (Direction::Down, downs),
            Trend::Sideways => return Ok(None),
        };
        if run < self.min_consecutive {
            return Ok(None);
        }

        let confidence = (run as f64 / (self.lookback as f64 * 1.5)).min(1.0);
        if confidence < self.confidence_threshold {
            return Ok(None);
        }
        Ok(Some(Signal::new(direction, confidence)))
    }
}

/// Mean reversion: fades stretched moves away from the 20-tick average.
///
/// Keeps its own window and waits `cooldown` ticks after each signal.
#[derive(Debug, Clone)]
pub struct BalancedReversion {
    history: TickHistory,
    min_history: usize,
    cooldown: u64,
    ticks_seen: u64,
    last_signal_tick: Option<u64>,
}

impl BalancedReversion {
    pub fn new(min_history: usize, cooldown: u64) -> Self {
        Self {
            history: TickHistory::new(100),
            min_history: min_history.max(20),
            cooldown,
            ticks_seen: 0,
            last_signal_tick: None,
        }
    }

    fn cooling_down(&self) -> bool {
        self.last_signal_tick
            .map_or(false, |last| self.ticks_seen - last < self.cooldown)
    }
}

impl Default for BalancedReversion {
    fn default() -> Self {
        Self::new(20, 15)
    }
}

fn sample_std_dev(prices: &[f64]) -> f64 {
    if prices.len() < 2 {
        return 0.0;
    }
    let mean = prices.iter().sum::<f64>() / prices.len() as f64;
    let variance =
        prices.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (prices.len() - 1) as f64;
    variance.sqrt()
}

impl EntryStrategy for BalancedReversion {
    fn name(&self) -> &str {
        "balanced"
    }

    fn should_enter(&mut self, tick: &TickRecord) -> Result<Option<Entry>, StrategyError> {
        self.history.push(tick.clone());
        self.ticks_seen += 1;

        if self.history.len() < self.min_history || self.cooling_down() {
            return Ok(None);
        }

        let recent = self.history.prices(10);
        let ma_20 = self
            .history
            .sma(20)
            .ok_or(StrategyError::InsufficientData {
                needed: 20,
                available: self.history.len(),
            })?;
        let (first, current) = match (recent.first(), recent.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => {
                return Err(StrategyError::InsufficientData {
                    needed: 10,
                    available: recent.len(),
                })
            }
        };
        if first == 0.0 || ma_20 == 0.0 {
            return Err(StrategyError::Numeric("zero price in window".to_string()));
        }

        let momentum = (current - first) / first * 100.0;
        let volatility = sample_std_dev(&recent);
        let distance = (current - ma_20) / ma_20 * 100.0;

        let call_score = [current < ma_20, momentum < -0.07, distance < -0.18, volatility > 0.18]
            .iter()
            .filter(|c| **c)
            .count();
        let put_score = [current > ma_20, momentum > 0.07, distance > 0.18, volatility > 0.18]
            .iter()
            .filter(|c| **c)
            .count();
        let strong = [momentum.abs() > 0.09, volatility > 0.22, distance.abs() > 0.22]
            .iter()
            .filter(|c| **c)
            .count();

        let entry = match (call_score, put_score) {
            (4, _) => Some(Entry::new(Direction::Up, 0.90)),
            (_, 4) => Some(Entry::new(Direction::Down, 0.90)),
            (3, _) if strong >= 2 => Some(Entry::new(Direction::Up, 0.75)),
            (_, 3) if strong >= 2 => Some(Entry::new(Direction::Down, 0.75)),
            _ => None,
        };

        if entry.is_some() {
            self.last_signal_tick = Some(self.ticks_seen);
        }
        Ok(entry)
    }

    fn contract_params(&self, _direction: Direction) -> ContractParams {
        ContractParams::new().with_duration(4, DurationUnit::Ticks)
    }
}

/// Trades on a fixed cadence, alternating direction. Useful for smoke runs.
#[derive(Debug, Clone)]
pub struct Cadence {
    every: u64,
    warmup: u64,
    ticks_seen: u64,
}

impl Cadence {
    pub fn new(every: u64, warmup: u64) -> Self {
        Self {
            every: every.max(1),
            warmup,
            ticks_seen: 0,
        }
    }
}

impl Default for Cadence {
    fn default() -> Self {
        Self::new(5, 3)
    }
}

impl EntryStrategy for Cadence {
    fn name(&self) -> &str {
        "cadence"
    }

    fn should_enter(&mut self, tick: &TickRecord) -> Result<Option<Entry>, StrategyError> {
        if tick.quote.to_f64().is_none() {
            return Err(StrategyError::Numeric(format!("unrepresentable quote {}", tick.quote)));
        }
        self.ticks_seen += 1;
        if self.ticks_seen < self.warmup || self.ticks_seen % self.every != 0 {
            return Ok(None);
        }
        let direction = if self.ticks_seen % (self.every * 2) == 0 {
            Direction::Up
        } else {
            Direction::Down
        };
        Ok(Some(Entry::new(direction, 0.95)))
    }

    fn contract_params(&self, _direction: Direction) -> ContractParams {
        ContractParams::new().with_duration(1, DurationUnit::Ticks)
    }
}
