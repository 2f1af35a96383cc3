//! Named session store
//!
//! A guarded map from session name to a running engine task. Sessions share
//! nothing; the registry only holds their handles and join handles.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::common::errors::{BotError, Result};
use crate::common::traits::BrokerSession;
use crate::engine::handle::{EngineState, SessionHandle};
use crate::engine::session::{SessionSummary, TradingEngine};
use crate::risk::stop_loss::SessionStats;

struct Entry {
    handle: SessionHandle,
    task: JoinHandle<Result<SessionSummary>>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Entry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `engine` on its own task under its name.
    ///
    /// Fails if a session with that name is still running. A finished session
    /// under the same name is replaced.
    pub fn start<B>(&self, mut engine: TradingEngine<B>) -> Result<SessionHandle>
    where
        B: BrokerSession + 'static,
    {
        let name = engine.name().to_string();
        let mut sessions = self.sessions();
        if let Some(existing) = sessions.get(&name) {
            if !existing.task.is_finished() {
                return Err(BotError::InvalidState(format!(
                    "session {} is already running",
                    name
                )));
            }
        }

        let handle = engine.handle();
        let task = tokio::spawn(async move { engine.start().await });
        sessions.insert(
            name.clone(),
            Entry {
                handle: handle.clone(),
                task,
            },
        );
        info!(session = %name, "Session registered");
        Ok(handle)
    }

    /// Ask a session to stop; returns false if the name is unknown
    pub fn stop(&self, name: &str) -> bool {
        match self.sessions().get(name) {
            Some(entry) => {
                entry.handle.stop();
                true
            }
            None => false,
        }
    }

    pub fn stats(&self, name: &str) -> Option<SessionStats> {
        self.sessions().get(name)?.handle.stats()
    }

    pub fn state(&self, name: &str) -> Option<EngineState> {
        self.sessions().get(name).map(|entry| entry.handle.state())
    }

    pub fn handle(&self, name: &str) -> Option<SessionHandle> {
        self.sessions().get(name).map(|entry| entry.handle.clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop a session, wait for its task and discard it.
    ///
    /// Returns the session's own outcome, or `None` if the name is unknown.
    pub async fn reset(&self, name: &str) -> Option<Result<SessionSummary>> {
        let entry = self.sessions().remove(name)?;
        entry.handle.stop();

        let outcome = match entry.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(session = %name, error = %e, "Session task failed");
                Err(BotError::Internal(format!("session task failed: {}", e)))
            }
        };
        info!(session = %name, "Session discarded");
        Some(outcome)
    }
}
