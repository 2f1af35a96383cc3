//! Bounded, recency-ordered tick history
//!
//! Composed by the engine and by strategies that keep their own window.
//! Oldest ticks are evicted first; iteration is oldest to newest.

use rust_decimal::prelude::ToPrimitive;
use std::collections::VecDeque;

use crate::common::types::TickRecord;

/// Share of moves in one direction needed to call a trend
const TREND_THRESHOLD: f64 = 0.6;

/// Coarse price trend over a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Up,
    Down,
    Sideways,
}

#[derive(Debug, Clone)]
pub struct TickHistory {
    ticks: VecDeque<TickRecord>,
    capacity: usize,
}

impl TickHistory {
    /// Create an empty history holding at most `capacity` ticks (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ticks: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a tick, evicting the oldest one when full
    pub fn push(&mut self, tick: TickRecord) {
        if self.ticks.len() == self.capacity {
            self.ticks.pop_front();
        }
        self.ticks.push_back(tick);
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.ticks.clear();
    }

    /// Most recent tick
    pub fn latest(&self) -> Option<&TickRecord> {
        self.ticks.back()
    }

    /// All ticks, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &TickRecord> {
        self.ticks.iter()
    }

    /// Prices of the last `n` ticks as floats, oldest first
    pub fn prices(&self, n: usize) -> Vec<f64> {
        let skip = self.ticks.len().saturating_sub(n);
        self.ticks
            .iter()
            .skip(skip)
            .filter_map(|tick| tick.quote.to_f64())
            .collect()
    }

    /// Simple moving average of the last `n` prices, if there are `n` of them
    pub fn sma(&self, n: usize) -> Option<f64> {
        if n == 0 || self.ticks.len() < n {
            return None;
        }
        let prices = self.prices(n);
        Some(prices.iter().sum::<f64>() / prices.len() as f64)
    }

    /// Population standard deviation of the last `n` prices
    pub fn volatility(&self, n: usize) -> f64 {
        let prices = self.prices(n);
        if prices.len() < 2 {
            return 0.0;
        }
        let mean = prices.iter().sum::<f64>() / prices.len() as f64;
        let variance =
            prices.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / prices.len() as f64;
        variance.sqrt()
    }

    /// Trend over the last `n` prices: more than 60% of moves in one direction
    pub fn trend(&self, n: usize) -> Trend {
        let prices = self.prices(n);
        let (ups, downs) = prices.windows(2).fold((0usize, 0usize), |(ups, downs), w| {
            if w[1] > w[0] {
                (ups + 1, downs)
            } else if w[1] < w[0] {
                (ups, downs + 1)
            } else {
                (ups, downs)
            }
        });

        let total = ups + downs;
        if total == 0 {
            return Trend::Sideways;
        }
        if ups as f64 / total as f64 > TREND_THRESHOLD {
            Trend::Up
        } else if downs as f64 / total as f64 > TREND_THRESHOLD {
            Trend::Down
        } else {
            Trend::Sideways
        }
    }

    /// Length of the trailing run of rising (or falling) moves in the last `n` prices.
    ///
    /// Returns `(ups, downs)`; at most one of them is non-zero.
    pub fn trailing_run(&self, n: usize) -> (usize, usize) {
        let prices = self.prices(n);
        prices.windows(2).fold((0, 0), |(ups, downs), w| {
            if w[1] > w[0] {
                (ups + 1, 0)
            } else if w[1] < w[0] {
                (0, downs + 1)
            } else {
                (0, 0)
            }
        })
    }
}
