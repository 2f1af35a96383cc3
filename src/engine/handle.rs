//! Cross-context handle to a running session
//!
//! The engine's event loop is the only writer of session state. Observers on
//! other tasks get snapshots published after every resolved contract and can
//! request a stop through a watch channel.

use serde::Serialize;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

use crate::risk::staking::StakeInfo;
use crate::risk::stop_loss::{SessionStats, StopReason};

/// Lifecycle of a TradingEngine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Idle,
    Running,
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Running => write!(f, "running"),
            EngineState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug)]
struct Published {
    state: RwLock<EngineState>,
    stats: RwLock<Option<SessionStats>>,
    stake: RwLock<Option<StakeInfo>>,
    stop_reason: RwLock<Option<StopReason>>,
}

/// Cloneable handle for stopping and observing a session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    name: Arc<str>,
    shutdown: Arc<watch::Sender<bool>>,
    published: Arc<Published>,
}

impl SessionHandle {
    pub(crate) fn new(name: &str) -> (Self, watch::Receiver<bool>) {
        let (shutdown, rx) = watch::channel(false);
        let handle = Self {
            name: Arc::from(name),
            shutdown: Arc::new(shutdown),
            published: Arc::new(Published {
                state: RwLock::new(EngineState::Idle),
                stats: RwLock::new(None),
                stake: RwLock::new(None),
                stop_reason: RwLock::new(None),
            }),
        };
        (handle, rx)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the session to stop. Safe to call any number of times.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_stop_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Latest session counters, or `None` if none were published yet
    /// or the snapshot is unavailable.
    pub fn stats(&self) -> Option<SessionStats> {
        self.published.stats.read().ok()?.clone()
    }

    /// Latest staking snapshot
    pub fn stake_info(&self) -> Option<StakeInfo> {
        self.published.stake.read().ok()?.clone()
    }

    pub fn state(&self) -> EngineState {
        self.published
            .state
            .read()
            .map(|state| *state)
            .unwrap_or(EngineState::Stopped)
    }

    /// Why the session stopped, once it has
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.published.stop_reason.read().ok()?.clone()
    }

    pub(crate) fn set_state(&self, state: EngineState) {
        if let Ok(mut slot) = self.published.state.write() {
            *slot = state;
        }
    }

    pub(crate) fn set_stop_reason(&self, reason: Option<StopReason>) {
        if let Ok(mut slot) = self.published.stop_reason.write() {
            *slot = reason;
        }
    }

    pub(crate) fn publish(&self, stats: SessionStats, stake: StakeInfo) {
        if let Ok(mut slot) = self.published.stats.write() {
            *slot = Some(stats);
        }
        if let Ok(mut slot) = self.published.stake.write() {
            *slot = Some(stake);
        }
    }
}
