//! Stake sizing progressions
//!
//! Every policy is a pure state machine over (stake, step, invested, cycles).
//! They start at the configured base stake with step 0 and never perform I/O.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::types::{RiskConfig, StakingKind};

/// Multipliers walked by the sequence progression
const SEQUENCE: [u32; 12] = [1, 1, 2, 3, 5, 8, 13, 21, 34, 55, 89, 144];

/// Snapshot of a policy's state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StakeInfo {
    pub stake: Decimal,
    pub step: u32,
    pub step_cap: u32,
    pub invested: Decimal,
    pub cycles: u32,
    /// Stake that would follow a loss from the current state
    pub next_stake_on_loss: Decimal,
}

/// Stake sizing algorithm
///
/// `next_stake` is the only operation that moves the progression; the
/// engine calls it once per resolved contract.
pub trait StakingPolicy: Send {
    /// Identifier used in logs and reports
    fn name(&self) -> &'static str;

    /// Stake for the next trade
    fn current_stake(&self) -> Decimal;

    /// Advance the progression with the outcome of the last trade
    fn next_stake(&mut self, was_win: bool) -> Decimal;

    /// Stake the progression would demand after one more loss
    fn projected_stake(&self) -> Decimal;

    /// Whether `balance` covers the projected stake
    fn can_afford(&self, balance: Decimal) -> bool {
        balance >= self.projected_stake()
    }

    /// Account for a committed stake, independent of its outcome
    fn record_invested(&mut self, amount: Decimal);

    fn info(&self) -> StakeInfo;

    /// Back to base stake and step 0 with nothing invested; cycles are kept
    fn reset(&mut self);
}

/// Boxed policy for dynamic dispatch
pub type BoxedStakingPolicy = Box<dyn StakingPolicy>;

/// Build the policy selected in configuration
pub fn build_policy(risk: &RiskConfig) -> BoxedStakingPolicy {
    let base = risk.base_stake;
    match risk.staking {
        StakingKind::Flat => Box::new(FlatStaking::new(base)),
        StakingKind::Classic => Box::new(ClassicProgression::new(base, risk.multiplier, risk.max_steps)),
        StakingKind::Inverse => Box::new(InverseProgression::new(base, risk.multiplier, risk.max_steps)),
        StakingKind::Arithmetic => {
            Box::new(ArithmeticProgression::new(base, risk.increment, risk.max_steps))
        }
        StakingKind::Sequence => Box::new(SequenceProgression::new(base, risk.sequence_max_steps)),
    }
}

/// State shared by every progression
#[derive(Debug, Clone, PartialEq)]
struct StakeState {
    base: Decimal,
    stake: Decimal,
    step: u32,
    step_cap: u32,
    invested: Decimal,
    cycles: u32,
}

impl StakeState {
    fn new(base: Decimal, step_cap: u32) -> Self {
        Self {
            base,
            stake: base,
            step: 0,
            step_cap,
            invested: Decimal::ZERO,
            cycles: 0,
        }
    }

    fn restart(&mut self) {
        self.stake = self.base;
        self.step = 0;
    }

    fn reset(&mut self) {
        self.restart();
        self.invested = Decimal::ZERO;
    }

    fn info(&self, next_stake_on_loss: Decimal) -> StakeInfo {
        StakeInfo {
            stake: self.stake,
            step: self.step,
            step_cap: self.step_cap,
            invested: self.invested,
            cycles: self.cycles,
            next_stake_on_loss,
        }
    }
}

/// Constant stake; every win counts as a completed cycle
#[derive(Debug, Clone)]
pub struct FlatStaking {
    state: StakeState,
}

impl FlatStaking {
    pub fn new(base: Decimal) -> Self {
        Self {
            state: StakeState::new(base, 0),
        }
    }
}

impl StakingPolicy for FlatStaking {
    fn name(&self) -> &'static str {
        "flat"
    }

    fn current_stake(&self) -> Decimal {
        self.state.stake
    }

    fn next_stake(&mut self, was_win: bool) -> Decimal {
        if was_win {
            self.state.cycles += 1;
        }
        self.state.stake
    }

    fn projected_stake(&self) -> Decimal {
        self.state.base
    }

    fn record_invested(&mut self, amount: Decimal) {
        self.state.invested += amount;
    }

    fn info(&self) -> StakeInfo {
        self.state.info(self.projected_stake())
    }

    fn reset(&mut self) {
        self.state.reset();
    }
}

/// Multiply on loss up to the step cap, reset on win
#[derive(Debug, Clone)]
pub struct ClassicProgression {
    state: StakeState,
    multiplier: Decimal,
}

impl ClassicProgression {
    pub fn new(base: Decimal, multiplier: Decimal, step_cap: u32) -> Self {
        Self {
            state: StakeState::new(base, step_cap),
            multiplier,
        }
    }
}

impl StakingPolicy for ClassicProgression {
    fn name(&self) -> &'static str {
        "classic"
    }

    fn current_stake(&self) -> Decimal {
        self.state.stake
    }

    fn next_stake(&mut self, was_win: bool) -> Decimal {
        let state = &mut self.state;
        if was_win {
            state.restart();
            state.cycles += 1;
        } else if state.step < state.step_cap {
            state.step += 1;
            state.stake *= self.multiplier;
        } else {
            state.restart();
        }
        state.stake
    }

    fn projected_stake(&self) -> Decimal {
        self.state.stake * self.multiplier
    }

    fn record_invested(&mut self, amount: Decimal) {
        self.state.invested += amount;
    }

    fn info(&self) -> StakeInfo {
        self.state.info(self.projected_stake())
    }

    fn reset(&mut self) {
        self.state.reset();
    }
}

/// Mirror of the classic progression: multiply on win, reset on loss
#[derive(Debug, Clone)]
pub struct InverseProgression {
    state: StakeState,
    multiplier: Decimal,
}

impl InverseProgression {
    pub fn new(base: Decimal, multiplier: Decimal, step_cap: u32) -> Self {
        Self {
            state: StakeState::new(base, step_cap),
            multiplier,
        }
    }
}

impl StakingPolicy for InverseProgression {
    fn name(&self) -> &'static str {
        "inverse"
    }

    fn current_stake(&self) -> Decimal {
        self.state.stake
    }

    fn next_stake(&mut self, was_win: bool) -> Decimal {
        let state = &mut self.state;
        if !was_win {
            state.restart();
        } else if state.step < state.step_cap {
            state.step += 1;
            state.stake *= self.multiplier;
        } else {
            state.restart();
            state.cycles += 1;
        }
        state.stake
    }

    fn projected_stake(&self) -> Decimal {
        self.state.stake * self.multiplier
    }

    fn record_invested(&mut self, amount: Decimal) {
        self.state.invested += amount;
    }

    fn info(&self) -> StakeInfo {
        self.state.info(self.projected_stake())
    }

    fn reset(&mut self) {
        self.state.reset();
    }
}

/// Add a fixed increment on loss, subtract it on win (floored at base)
#[derive(Debug, Clone)]
pub struct ArithmeticProgression {
    state: StakeState,
    increment: Decimal,
}

impl ArithmeticProgression {
    pub fn new(base: Decimal, increment: Decimal, step_cap: u32) -> Self {
        Self {
            state: StakeState::new(base, step_cap),
            increment,
        }
    }
}

impl StakingPolicy for ArithmeticProgression {
    fn name(&self) -> &'static str {
        "arithmetic"
    }

    fn current_stake(&self) -> Decimal {
        self.state.stake
    }

    fn next_stake(&mut self, was_win: bool) -> Decimal {
        let state = &mut self.state;
        if was_win {
            if state.step > 0 {
                state.step -= 1;
                state.stake -= self.increment;
            } else {
                state.cycles += 1;
            }
            if state.stake < state.base {
                state.stake = state.base;
            }
        } else if state.step < state.step_cap {
            state.step += 1;
            state.stake += self.increment;
        } else {
            state.restart();
        }
        state.stake
    }

    fn projected_stake(&self) -> Decimal {
        self.state.stake + self.increment
    }

    fn record_invested(&mut self, amount: Decimal) {
        self.state.invested += amount;
    }

    fn info(&self) -> StakeInfo {
        self.state.info(self.projected_stake())
    }

    fn reset(&mut self) {
        self.state.reset();
    }
}

/// Walks 1,1,2,3,5,8,... forward one step per loss and back two per win
#[derive(Debug, Clone)]
pub struct SequenceProgression {
    state: StakeState,
}

impl SequenceProgression {
    pub fn new(base: Decimal, step_cap: u32) -> Self {
        Self {
            state: StakeState::new(base, step_cap),
        }
    }

    fn stake_at(&self, step: u32) -> Decimal {
        let index = (step as usize).min(SEQUENCE.len() - 1);
        self.state.base * Decimal::from(SEQUENCE[index])
    }
}

impl StakingPolicy for SequenceProgression {
    fn name(&self) -> &'static str {
        "sequence"
    }

    fn current_stake(&self) -> Decimal {
        self.state.stake
    }

    fn next_stake(&mut self, was_win: bool) -> Decimal {
        let last = SEQUENCE.len() as u32 - 1;
        let step = self.state.step;
        let next = if was_win {
            if step >= 2 {
                step - 2
            } else {
                self.state.cycles += 1;
                0
            }
        } else if step < last && step < self.state.step_cap {
            step + 1
        } else {
            0
        };

        self.state.step = next;
        self.state.stake = self.stake_at(next);
        self.state.stake
    }

    fn projected_stake(&self) -> Decimal {
        self.stake_at(self.state.step + 1)
    }

    fn record_invested(&mut self, amount: Decimal) {
        self.state.invested += amount;
    }

    fn info(&self) -> StakeInfo {
        self.state.info(self.projected_stake())
    }

    fn reset(&mut self) {
        self.state.reset();
    }
}
