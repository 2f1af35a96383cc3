//! Session-level stop-loss and stop-gain enforcement

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::types::{RiskConfig, StopMode};

/// Why a session stopped (or must stop)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    BalanceFloor,
    LossLimit,
    ProfitTarget,
    ConsecutiveLosses,
    DailyTradeLimit,
    /// Stopped through the session handle
    External,
    /// The link gave up reconnecting or the tick stream was refused
    ConnectionLost,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::BalanceFloor => write!(f, "balance at or below floor"),
            StopReason::LossLimit => write!(f, "loss limit reached"),
            StopReason::ProfitTarget => write!(f, "profit target reached"),
            StopReason::ConsecutiveLosses => write!(f, "consecutive loss limit reached"),
            StopReason::DailyTradeLimit => write!(f, "daily trade limit reached"),
            StopReason::External => write!(f, "stopped by request"),
            StopReason::ConnectionLost => write!(f, "connection lost"),
        }
    }
}

/// Outcome of a guard check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Halt(StopReason),
}

impl Verdict {
    pub fn is_halt(&self) -> bool {
        matches!(self, Verdict::Halt(_))
    }
}

/// Read-only snapshot of session counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub net_profit: Decimal,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    pub total_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub current_win_streak: u32,
    pub current_loss_streak: u32,
    pub max_win_streak: u32,
    pub max_loss_streak: u32,
    pub started_at: DateTime<Utc>,
}

impl SessionStats {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            net_profit: Decimal::ZERO,
            gross_profit: Decimal::ZERO,
            gross_loss: Decimal::ZERO,
            total_trades: 0,
            wins: 0,
            losses: 0,
            current_win_streak: 0,
            current_loss_streak: 0,
            max_win_streak: 0,
            max_loss_streak: 0,
            started_at,
        }
    }

    /// Win percentage, 0 when nothing has resolved yet
    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.wins as f64 / self.total_trades as f64 * 100.0
    }

    /// Gross profit over gross loss, if any loss has been booked
    pub fn profit_factor(&self) -> Option<f64> {
        if self.gross_loss.is_zero() {
            return None;
        }
        (self.gross_profit / self.gross_loss).to_f64()
    }
}

/// Tracks session P&L and decides whether trading may continue
#[derive(Debug, Clone)]
pub struct StopLossGuard {
    profit_target: Decimal,
    loss_limit: Decimal,
    balance_floor: Decimal,
    mode: StopMode,
    max_consecutive_losses: u32,
    stats: SessionStats,
}

impl StopLossGuard {
    pub fn new(risk: &RiskConfig) -> Self {
        Self {
            profit_target: risk.profit_target,
            loss_limit: risk.loss_limit,
            balance_floor: risk.balance_floor,
            mode: risk.stop_mode,
            max_consecutive_losses: risk.max_consecutive_losses,
            stats: SessionStats::new(Utc::now()),
        }
    }

    /// May another trade be placed with `balance` in the account?
    pub fn permit(&self, balance: Decimal) -> Verdict {
        if balance <= self.balance_floor {
            return Verdict::Halt(StopReason::BalanceFloor);
        }
        self.limits()
    }

    /// Must the session stop now?
    pub fn should_stop(&self) -> Verdict {
        self.limits()
    }

    fn limits(&self) -> Verdict {
        let net = self.stats.net_profit;
        if net <= -self.loss_limit {
            return Verdict::Halt(StopReason::LossLimit);
        }
        if net >= self.profit_target {
            return Verdict::Halt(StopReason::ProfitTarget);
        }
        if self.mode == StopMode::ConsecutiveLosses
            && self.stats.current_loss_streak >= self.max_consecutive_losses
        {
            return Verdict::Halt(StopReason::ConsecutiveLosses);
        }
        Verdict::Continue
    }

    /// Book a resolved contract
    pub fn record(&mut self, profit: Decimal, was_win: bool) {
        let stats = &mut self.stats;
        stats.total_trades += 1;
        stats.net_profit += profit;

        if profit > Decimal::ZERO {
            stats.gross_profit += profit;
        } else {
            stats.gross_loss += profit.abs();
        }

        if was_win {
            stats.wins += 1;
            stats.current_win_streak += 1;
            stats.current_loss_streak = 0;
            stats.max_win_streak = stats.max_win_streak.max(stats.current_win_streak);
        } else {
            stats.losses += 1;
            stats.current_loss_streak += 1;
            stats.current_win_streak = 0;
            stats.max_loss_streak = stats.max_loss_streak.max(stats.current_loss_streak);
        }
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.clone()
    }

    /// Zero every counter and restart the session clock
    pub fn reset(&mut self) {
        self.stats = SessionStats::new(Utc::now());
    }
}
