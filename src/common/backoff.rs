//! Reconnect pacing for the broker link

use rand::Rng;
use std::time::Duration;

use crate::config::types::BrokerConfig;

/// Jitter applied to every reconnect delay, as a fraction of the delay
pub const RECONNECT_JITTER: f64 = 0.1;

/// Doubling delay between reconnect attempts, capped and jittered, with an
/// optional attempt budget.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    first: Duration,
    cap: Duration,
    jitter: f64,
    budget: u32,
    attempts: u32,
}

impl ReconnectBackoff {
    /// `budget` of 0 means retry forever. Negative jitter counts as none.
    pub fn new(first: Duration, cap: Duration, jitter: f64, budget: u32) -> Self {
        Self {
            first,
            cap: cap.max(first),
            jitter: jitter.max(0.0),
            budget,
            attempts: 0,
        }
    }

    pub fn from_config(config: &BrokerConfig) -> Self {
        Self::new(
            config.reconnect_delay(),
            config.max_reconnect_delay(),
            RECONNECT_JITTER,
            config.max_reconnect_attempts,
        )
    }

    /// Attempts handed out so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn exhausted(&self) -> bool {
        self.budget > 0 && self.attempts >= self.budget
    }

    /// Delay before the next attempt, or `None` once the budget is spent
    pub fn next_attempt(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }
        let factor = 1u32.checked_shl(self.attempts.min(31)).unwrap_or(u32::MAX);
        let delay = self.first.saturating_mul(factor).min(self.cap);
        self.attempts += 1;

        let spread = delay.as_secs_f64() * self.jitter;
        if spread <= 0.0 {
            return Some(delay);
        }
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Some(Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0)))
    }
}
