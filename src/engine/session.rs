//! Tick-driven trading session
//!
//! `TradingEngine` is the single writer of session state. Broker events are
//! consumed one at a time from the link's channel, so every decision (tick
//! evaluation, contract resolution) runs in one sequential context and the
//! staking policy and stop-loss guard need no locking.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::common::channels::{create_event_channel, EventReceiver};
use crate::common::errors::{BotError, RequestStage, Result, StrategyError};
use crate::common::traits::BrokerSession;
use crate::common::types::{
    BrokerEvent, ConnectionState, ContractStatus, ContractUpdate, TickRecord, TradeRequest,
};
use crate::config::types::AppConfig;
use crate::deriv::BrokerLink;
use crate::engine::handle::{EngineState, SessionHandle};
use crate::risk::staking::{build_policy, BoxedStakingPolicy, StakeInfo};
use crate::risk::stop_loss::{SessionStats, StopLossGuard, StopReason, Verdict};
use crate::strategy::{BoxedSignalSource, Signal, TickHistory};

/// The one contract a session may have in flight
#[derive(Debug, Clone)]
struct ContractRecord {
    contract_id: Option<u64>,
    stake: Decimal,
    status: ContractStatus,
    profit: Decimal,
}

impl ContractRecord {
    fn submitted(stake: Decimal) -> Self {
        Self {
            contract_id: None,
            stake,
            status: ContractStatus::Pending,
            profit: Decimal::ZERO,
        }
    }
}

/// Trades submitted on the current UTC day
#[derive(Debug, Clone)]
struct DailyCounter {
    date: NaiveDate,
    count: u32,
}

impl DailyCounter {
    fn new(date: NaiveDate) -> Self {
        Self { date, count: 0 }
    }

    fn count_on(&mut self, date: NaiveDate) -> u32 {
        if date != self.date {
            debug!(previous = %self.date, today = %date, "Daily trade counter rolled over");
            self.date = date;
            self.count = 0;
        }
        self.count
    }

    fn increment(&mut self, date: NaiveDate) {
        self.count_on(date);
        self.count += 1;
    }
}

/// End-of-session report returned by `start()`
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session: String,
    pub strategy: String,
    pub staking: String,
    pub stop_reason: Option<StopReason>,
    pub stats: SessionStats,
    pub stake: StakeInfo,
    pub trades_today: u32,
    pub duration_secs: i64,
}

/// Orchestrates strategy, staking, stop-loss and the brokerage link
pub struct TradingEngine<B: BrokerSession> {
    name: String,
    config: AppConfig,
    broker: B,
    events: EventReceiver,
    strategy: BoxedSignalSource,
    staking: BoxedStakingPolicy,
    guard: StopLossGuard,
    history: TickHistory,
    pending: Option<ContractRecord>,
    daily: DailyCounter,
    state: EngineState,
    stop_reason: Option<StopReason>,
    fatal: Option<BotError>,
    handle: SessionHandle,
    shutdown: watch::Receiver<bool>,
}

impl TradingEngine<BrokerLink> {
    /// Build a session wired to a fresh Deriv link
    pub fn with_deriv(
        name: impl Into<String>,
        config: AppConfig,
        strategy: BoxedSignalSource,
    ) -> Self {
        let (tx, rx) = create_event_channel();
        let link = BrokerLink::new(config.broker.clone(), tx).with_basis(config.trading.basis.clone());
        Self::new(name, config, link, rx, strategy)
    }
}

impl<B: BrokerSession> TradingEngine<B> {
    /// Create an idle session. `events` must be the receiving end of the
    /// channel `broker` reports on.
    pub fn new(
        name: impl Into<String>,
        config: AppConfig,
        broker: B,
        events: EventReceiver,
        strategy: BoxedSignalSource,
    ) -> Self {
        let name = name.into();
        let (handle, shutdown) = SessionHandle::new(&name);
        Self {
            staking: build_policy(&config.risk),
            guard: StopLossGuard::new(&config.risk),
            history: TickHistory::new(config.trading.history_capacity),
            daily: DailyCounter::new(Utc::now().date_naive()),
            name,
            config,
            broker,
            events,
            strategy,
            pending: None,
            state: EngineState::Idle,
            stop_reason: None,
            fatal: None,
            handle,
            shutdown,
        }
    }

    /// Replace the staking policy built from configuration
    pub fn with_staking(mut self, staking: BoxedStakingPolicy) -> Self {
        self.staking = staking;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Handle for stopping and observing this session from another task
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn has_pending_contract(&self) -> bool {
        self.pending.is_some()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn stats(&self) -> SessionStats {
        self.guard.stats()
    }

    pub fn stake_info(&self) -> StakeInfo {
        self.staking.info()
    }

    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    /// Connect, authorize and subscribe, then process broker events until
    /// the session stops.
    ///
    /// Returns the session report. A link that gave up reconnecting is
    /// reported as `ReconnectExhausted` after the session is shut down.
    #[instrument(skip(self), fields(session = %self.name))]
    pub async fn start(&mut self) -> Result<SessionSummary> {
        if self.state != EngineState::Idle {
            return Err(BotError::InvalidState(format!(
                "session {} is {}",
                self.name, self.state
            )));
        }

        if let Err(e) = self.open_session().await {
            error!(error = %e, "Session failed to start");
            self.stop().await;
            return Err(e);
        }

        self.set_state(EngineState::Running);
        info!(
            strategy = %self.strategy.name(),
            staking = %self.staking.name(),
            stake = %self.staking.current_stake(),
            "Session running"
        );

        self.run().await;
        self.stop().await;

        let summary = self.summary();
        log_report(&summary);

        match self.fatal.take() {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    async fn open_session(&mut self) -> Result<()> {
        self.config.validate()?;
        let credential = self
            .config
            .broker
            .api_token
            .clone()
            .ok_or_else(|| BotError::Configuration("broker.api_token is not set".to_string()))?;

        self.broker.connect().await?;
        let account = self.broker.authorize(&credential).await?;

        let required = self.config.trading.min_balance;
        if account.balance < required {
            return Err(BotError::InsufficientBalance {
                balance: account.balance,
                required,
            });
        }

        self.broker.subscribe_ticks(&self.config.trading.symbol).await?;
        self.guard.reset();
        self.publish();
        Ok(())
    }

    /// Passive wait: all work happens in `handle_event`.
    async fn run(&mut self) {
        if *self.shutdown.borrow_and_update() {
            self.halt(StopReason::External);
        }

        while self.stop_reason.is_none() {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        self.halt(StopReason::External);
                    }
                }
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        error!("Broker event channel closed");
                        self.fatal = Some(BotError::ChannelSend("broker event channel closed".to_string()));
                        self.halt(StopReason::ConnectionLost);
                    }
                },
            }
        }
    }

    /// Stop trading and disconnect. Safe to call more than once.
    #[instrument(skip(self), fields(session = %self.name))]
    pub async fn stop(&mut self) {
        if self.state == EngineState::Stopped {
            debug!("Session already stopped");
            return;
        }
        if self.state == EngineState::Running && self.stop_reason.is_none() {
            self.stop_reason = Some(StopReason::External);
        }
        self.set_state(EngineState::Stopped);

        if let Err(e) = self.broker.disconnect().await {
            warn!(error = %e, "Disconnect failed");
        }
        if let Some(pending) = &self.pending {
            warn!(
                contract_id = ?pending.contract_id,
                stake = %pending.stake,
                status = ?pending.status,
                profit = %pending.profit,
                "Stopping with a contract still pending"
            );
        }

        self.handle.set_stop_reason(self.stop_reason.clone());
        self.publish();
        info!(reason = ?self.stop_reason, "Session stopped");
    }

    /// Apply one broker event to session state
    pub fn handle_event(&mut self, event: BrokerEvent) {
        match event {
            BrokerEvent::Tick(tick) => self.on_tick(tick),
            BrokerEvent::Balance(balance) => debug!(balance = %balance, "Balance update"),
            BrokerEvent::ContractOpened {
                contract_id,
                buy_price,
            } => self.on_contract_opened(contract_id, buy_price),
            BrokerEvent::ContractUpdated(update) => self.on_contract_updated(update),
            BrokerEvent::RequestRejected {
                stage,
                code,
                message,
            } => self.on_request_rejected(stage, code, message),
            BrokerEvent::ConnectionStatus(state) => {
                if state == ConnectionState::Disconnected && self.state == EngineState::Running {
                    warn!("Link down, waiting for reconnect");
                } else {
                    debug!(state = %state, "Link state");
                }
            }
            BrokerEvent::ConnectionLost { reason, attempts } => {
                error!(attempts, reason = %reason, "Link gave up reconnecting");
                self.fatal = Some(BotError::ReconnectExhausted { attempts });
                self.halt(StopReason::ConnectionLost);
            }
        }
    }

    fn on_tick(&mut self, tick: TickRecord) {
        if self.pending.is_some() {
            trace!(quote = %tick.quote, "Contract pending, tick ignored");
            return;
        }
        if self.stop_reason.is_some() {
            return;
        }

        let today = tick.timestamp.date_naive();
        self.history.push(tick);

        let balance = self.broker.balance();
        if let Verdict::Halt(reason) = self.guard.permit(balance) {
            self.halt(reason);
            return;
        }

        let max_trades = self.config.trading.max_trades_per_day;
        if self.daily.count_on(today) >= max_trades {
            info!(max_trades, "Daily trade limit reached");
            self.halt(StopReason::DailyTradeLimit);
            return;
        }

        let Some(signal) = self.evaluate() else {
            return;
        };

        let stake = self.staking.current_stake().round_dp(2);
        if balance < stake {
            warn!(
                balance = %balance,
                stake = %stake,
                "Balance below stake, skipping signal"
            );
            return;
        }
        if !self.staking.can_afford(balance) {
            debug!(
                balance = %balance,
                next = %self.staking.projected_stake(),
                "Balance will not cover the next progression step"
            );
        }

        let request = self.trade_request(&signal, stake);
        match self.broker.request_trade(&request) {
            Ok(()) => {
                self.pending = Some(ContractRecord::submitted(stake));
                self.daily.increment(today);
                self.staking.record_invested(stake);
                info!(
                    direction = %signal.direction,
                    confidence = signal.confidence,
                    contract_type = %request.contract_type,
                    stake = %stake,
                    trades_today = self.daily.count,
                    "Trade submitted"
                );
            }
            Err(e) => warn!(error = %e, "Trade request not sent"),
        }
    }

    /// Ask the strategy for a signal; errors and panics count as no signal.
    fn evaluate(&mut self) -> Option<Signal> {
        let strategy = &mut self.strategy;
        let history = &self.history;
        let outcome = catch_unwind(AssertUnwindSafe(|| strategy.evaluate(history)));

        let fault = match outcome {
            Ok(Ok(signal)) => return signal,
            Ok(Err(e)) => e,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                StrategyError::Panicked(message)
            }
        };
        warn!(strategy = %self.strategy.name(), error = %fault, "Strategy evaluation failed");
        None
    }

    fn trade_request(&self, signal: &Signal, stake: Decimal) -> TradeRequest {
        let trading = &self.config.trading;
        let params = &signal.params;
        TradeRequest {
            contract_type: signal.contract_type(),
            symbol: params.symbol.clone().unwrap_or_else(|| trading.symbol.clone()),
            amount: stake,
            duration: params.duration.unwrap_or(trading.duration),
            duration_unit: params.duration_unit.unwrap_or(trading.duration_unit),
            barrier: params.barrier.clone(),
        }
    }

    fn on_contract_opened(&mut self, contract_id: u64, buy_price: Decimal) {
        match self.pending.as_mut() {
            Some(pending) if pending.contract_id.is_none() => {
                pending.contract_id = Some(contract_id);
                info!(contract_id, buy_price = %buy_price, stake = %pending.stake, "Contract opened");
            }
            Some(pending) => warn!(
                contract_id,
                pending = ?pending.contract_id,
                "Unexpected contract while another is pending"
            ),
            None => warn!(contract_id, "Contract opened with nothing pending"),
        }
    }

    fn on_contract_updated(&mut self, update: ContractUpdate) {
        let Some(pending) = self.pending.as_mut() else {
            debug!(contract_id = update.contract_id, "Update for untracked contract");
            return;
        };
        match pending.contract_id {
            Some(id) if id != update.contract_id => {
                debug!(contract_id = update.contract_id, pending = id, "Update for another contract");
                return;
            }
            Some(_) => {}
            None => pending.contract_id = Some(update.contract_id),
        }

        pending.status = update.status;
        pending.profit = update.profit;
        if !update.status.is_terminal() {
            return;
        }

        let won = update.status == ContractStatus::Won;
        let next_stake = self.staking.next_stake(won);
        self.guard.record(update.profit, won);
        self.pending = None;

        info!(
            contract_id = update.contract_id,
            won,
            profit = %update.profit,
            net_profit = %self.guard.stats().net_profit,
            next_stake = %next_stake,
            "Contract resolved"
        );
        self.publish();

        if let Verdict::Halt(reason) = self.guard.should_stop() {
            self.halt(reason);
        }
    }

    fn on_request_rejected(&mut self, stage: RequestStage, code: String, message: String) {
        let rejection = BotError::BrokerRejected {
            stage,
            code,
            message,
        };
        match stage {
            RequestStage::Ticks => {
                error!(error = %rejection, "Tick stream refused");
                self.fatal = Some(rejection);
                self.halt(StopReason::ConnectionLost);
            }
            RequestStage::Proposal | RequestStage::Buy => {
                let awaiting_purchase = self
                    .pending
                    .as_ref()
                    .map_or(false, |pending| pending.contract_id.is_none());
                if awaiting_purchase {
                    self.pending = None;
                    warn!(error = %rejection, "Trade not placed");
                } else {
                    debug!(error = %rejection, "Rejection with no request waiting");
                }
            }
            RequestStage::Contract => warn!(error = %rejection, "Contract tracking failed"),
        }
    }

    fn halt(&mut self, reason: StopReason) {
        if self.stop_reason.is_none() {
            info!(reason = %reason, "Session halting");
            self.stop_reason = Some(reason);
        }
    }

    fn set_state(&mut self, state: EngineState) {
        self.state = state;
        self.handle.set_state(state);
    }

    fn publish(&self) {
        self.handle.publish(self.guard.stats(), self.staking.info());
    }

    fn summary(&self) -> SessionSummary {
        let stats = self.guard.stats();
        SessionSummary {
            session: self.name.clone(),
            strategy: self.strategy.name().to_string(),
            staking: self.staking.name().to_string(),
            stop_reason: self.stop_reason.clone(),
            duration_secs: (Utc::now() - stats.started_at).num_seconds(),
            trades_today: self.daily.count,
            stake: self.staking.info(),
            stats,
        }
    }
}

fn log_report(summary: &SessionSummary) {
    let stats = &summary.stats;
    info!(
        session = %summary.session,
        reason = ?summary.stop_reason,
        duration_secs = summary.duration_secs,
        "Session report"
    );
    info!(
        net = %stats.net_profit,
        gross_profit = %stats.gross_profit,
        gross_loss = %stats.gross_loss,
        "Profit and loss"
    );
    info!(
        trades = stats.total_trades,
        wins = stats.wins,
        losses = stats.losses,
        win_rate = %format!("{:.1}%", stats.win_rate()),
        max_win_streak = stats.max_win_streak,
        max_loss_streak = stats.max_loss_streak,
        "Trades"
    );
    info!(
        staking = %summary.staking,
        invested = %summary.stake.invested,
        cycles = summary.stake.cycles,
        "Staking"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::traits::MockBrokerSession;
    use crate::common::types::AccountSnapshot;
    use crate::config::types::StopMode;
    use crate::strategy::{from_entry, from_history, Cadence, HistoryStrategy};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct FakeBroker {
        balance: Arc<Mutex<Decimal>>,
        requests: Arc<Mutex<Vec<TradeRequest>>>,
        disconnects: Arc<Mutex<u32>>,
    }

    impl FakeBroker {
        fn with_balance(balance: Decimal) -> Self {
            let broker = Self::default();
            *broker.balance.lock().unwrap() = balance;
            broker
        }

        fn requests(&self) -> Vec<TradeRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BrokerSession for FakeBroker {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn authorize(&self, _credential: &str) -> Result<AccountSnapshot> {
            Ok(AccountSnapshot {
                balance: *self.balance.lock().unwrap(),
                ..AccountSnapshot::default()
            })
        }

        async fn subscribe_ticks(&self, _symbol: &str) -> Result<()> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            *self.disconnects.lock().unwrap() += 1;
            Ok(())
        }

        fn state(&self) -> ConnectionState {
            ConnectionState::Subscribed
        }

        fn balance(&self) -> Decimal {
            *self.balance.lock().unwrap()
        }

        fn request_trade(&self, request: &TradeRequest) -> Result<()> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(())
        }

        fn track_contract(&self, _contract_id: u64) -> Result<()> {
            Ok(())
        }
    }

    struct Panicky;

    impl HistoryStrategy for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }

        fn produce_signal(&mut self, _history: &TickHistory) -> std::result::Result<Option<Signal>, StrategyError> {
            panic!("indicator blew up")
        }
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.broker.api_token = Some("test-token".to_string());
        config
    }

    fn engine_with(broker: FakeBroker, config: AppConfig) -> TradingEngine<FakeBroker> {
        let (_tx, rx) = create_event_channel();
        TradingEngine::new("test", config, broker, rx, from_entry(Cadence::new(1, 0)))
    }

    fn tick(price: Decimal) -> BrokerEvent {
        BrokerEvent::Tick(TickRecord::new("R_100", price, Utc::now()))
    }

    fn resolve(contract_id: u64, status: ContractStatus, profit: Decimal) -> BrokerEvent {
        BrokerEvent::ContractUpdated(ContractUpdate {
            contract_id,
            status,
            profit,
        })
    }

    #[test]
    fn test_tick_while_pending_is_ignored() {
        let broker = FakeBroker::with_balance(dec!(100));
        let mut engine = engine_with(broker.clone(), config());

        engine.handle_event(tick(dec!(100.1)));
        assert!(engine.has_pending_contract());
        assert_eq!(broker.requests().len(), 1);
        assert_eq!(engine.history_len(), 1);

        engine.handle_event(tick(dec!(100.2)));
        engine.handle_event(tick(dec!(100.3)));
        assert_eq!(broker.requests().len(), 1);
        assert_eq!(engine.history_len(), 1);

        engine.handle_event(BrokerEvent::ContractOpened {
            contract_id: 42,
            buy_price: dec!(0.35),
        });
        engine.handle_event(resolve(42, ContractStatus::Pending, dec!(0.1)));
        assert!(engine.has_pending_contract());

        engine.handle_event(resolve(42, ContractStatus::Lost, dec!(-0.35)));
        assert!(!engine.has_pending_contract());
        assert_eq!(engine.stats().losses, 1);

        engine.handle_event(tick(dec!(100.4)));
        let requests = broker.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].amount, dec!(0.70));
        assert_eq!(engine.history_len(), 2);
    }

    #[test]
    fn test_request_rejection_clears_pending() {
        let broker = FakeBroker::with_balance(dec!(100));
        let mut engine = engine_with(broker.clone(), config());

        engine.handle_event(tick(dec!(100)));
        assert!(engine.has_pending_contract());

        engine.handle_event(BrokerEvent::RequestRejected {
            stage: RequestStage::Proposal,
            code: "ContractBuyValidationError".to_string(),
            message: "Trading is not offered for this duration.".to_string(),
        });
        assert!(!engine.has_pending_contract());
        assert_eq!(engine.stats().total_trades, 0);
        assert_eq!(engine.stake_info().stake, dec!(0.35));
    }

    #[test]
    fn test_refused_purchase_frees_next_tick() {
        let broker = FakeBroker::with_balance(dec!(100));
        let mut engine = engine_with(broker.clone(), config());

        engine.handle_event(tick(dec!(100)));
        assert!(engine.has_pending_contract());

        engine.handle_event(BrokerEvent::RequestRejected {
            stage: RequestStage::Buy,
            code: "InsufficientBalance".to_string(),
            message: "Your account balance is insufficient for this transaction.".to_string(),
        });
        assert!(!engine.has_pending_contract());
        assert_eq!(engine.stats().total_trades, 0);
        assert!(engine.stop_reason().is_none());

        engine.handle_event(tick(dec!(100.1)));
        assert!(engine.has_pending_contract());
        let requests = broker.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].amount, dec!(0.35));
    }

    #[test]
    fn test_buy_rejection_after_contract_opened_is_ignored() {
        let broker = FakeBroker::with_balance(dec!(100));
        let mut engine = engine_with(broker.clone(), config());

        engine.handle_event(tick(dec!(100)));
        engine.handle_event(BrokerEvent::ContractOpened {
            contract_id: 5,
            buy_price: dec!(0.35),
        });
        engine.handle_event(BrokerEvent::RequestRejected {
            stage: RequestStage::Buy,
            code: "TransportReset".to_string(),
            message: "no contract was opened before the transport reset".to_string(),
        });
        assert!(engine.has_pending_contract());

        engine.handle_event(tick(dec!(100.1)));
        assert_eq!(broker.requests().len(), 1);
        engine.handle_event(resolve(5, ContractStatus::Won, dec!(0.33)));
        assert_eq!(engine.stats().wins, 1);
    }

    #[test]
    fn test_refused_tick_stream_halts() {
        let broker = FakeBroker::with_balance(dec!(100));
        let mut engine = engine_with(broker, config());

        engine.handle_event(BrokerEvent::RequestRejected {
            stage: RequestStage::Ticks,
            code: "MarketIsClosed".to_string(),
            message: "This market is presently closed.".to_string(),
        });
        assert_eq!(engine.stop_reason(), Some(&StopReason::ConnectionLost));
        assert!(matches!(
            engine.fatal,
            Some(BotError::BrokerRejected {
                stage: RequestStage::Ticks,
                ..
            })
        ));
    }

    #[test]
    fn test_balance_below_stake_skips_trade() {
        let broker = FakeBroker::with_balance(dec!(0.30));
        let mut config = config();
        config.risk.balance_floor = Decimal::ZERO;
        let mut engine = engine_with(broker.clone(), config);

        engine.handle_event(tick(dec!(100)));
        assert!(broker.requests().is_empty());
        assert!(!engine.has_pending_contract());
        assert!(engine.stop_reason().is_none());
    }

    #[test]
    fn test_profit_target_halts_session() {
        let broker = FakeBroker::with_balance(dec!(100));
        let mut engine = engine_with(broker.clone(), config());

        for (id, profit) in [(1u64, dec!(1.0)), (2, dec!(1.5))] {
            engine.handle_event(tick(dec!(100)));
            engine.handle_event(BrokerEvent::ContractOpened {
                contract_id: id,
                buy_price: dec!(0.35),
            });
            engine.handle_event(resolve(id, ContractStatus::Won, profit));
        }

        assert_eq!(engine.stop_reason(), Some(&StopReason::ProfitTarget));
        engine.handle_event(tick(dec!(100)));
        assert_eq!(broker.requests().len(), 2);
    }

    #[test]
    fn test_consecutive_losses_halt() {
        let broker = FakeBroker::with_balance(dec!(100));
        let mut config = config();
        config.risk.stop_mode = StopMode::ConsecutiveLosses;
        config.risk.max_consecutive_losses = 2;
        let mut engine = engine_with(broker, config);

        for id in 1..=2u64 {
            engine.handle_event(tick(dec!(100)));
            engine.handle_event(resolve(id, ContractStatus::Lost, dec!(-0.35)));
        }
        assert_eq!(engine.stop_reason(), Some(&StopReason::ConsecutiveLosses));
    }

    #[test]
    fn test_daily_limit_and_rollover() {
        let broker = FakeBroker::with_balance(dec!(100));
        let mut config = config();
        config.trading.max_trades_per_day = 1;
        let mut engine = engine_with(broker.clone(), config);

        let day_one = Utc.with_ymd_and_hms(2026, 3, 2, 23, 59, 0).unwrap();
        let day_two = day_one + ChronoDuration::minutes(2);

        engine.handle_event(BrokerEvent::Tick(TickRecord::new("R_100", dec!(100), day_one)));
        engine.handle_event(resolve(7, ContractStatus::Won, dec!(0.33)));
        assert!(engine.stop_reason().is_none());

        let mut counter = DailyCounter::new(day_one.date_naive());
        counter.increment(day_one.date_naive());
        assert_eq!(counter.count_on(day_one.date_naive()), 1);
        assert_eq!(counter.count_on(day_two.date_naive()), 0);

        engine.handle_event(BrokerEvent::Tick(TickRecord::new("R_100", dec!(100), day_one)));
        assert_eq!(engine.stop_reason(), Some(&StopReason::DailyTradeLimit));
        assert_eq!(broker.requests().len(), 1);
    }

    #[test]
    fn test_strategy_panic_is_no_signal() {
        let broker = FakeBroker::with_balance(dec!(100));
        let (_tx, rx) = create_event_channel();
        let mut engine = TradingEngine::new("test", config(), broker.clone(), rx, from_history(Panicky, 1));

        engine.handle_event(tick(dec!(100)));
        engine.handle_event(tick(dec!(101)));
        assert!(broker.requests().is_empty());
        assert_eq!(engine.history_len(), 2);
        assert!(engine.stop_reason().is_none());
    }

    #[test]
    fn test_signal_params_fill_trade_request() {
        let broker = FakeBroker::with_balance(dec!(100));
        let mut engine = engine_with(broker.clone(), config());
        engine.handle_event(tick(dec!(100)));

        let request = &broker.requests()[0];
        assert_eq!(request.symbol, "R_100");
        assert_eq!(request.duration, 1);
        assert_eq!(request.amount, dec!(0.35));
    }

    #[tokio::test]
    async fn test_stop_twice_is_idempotent() {
        let broker = FakeBroker::with_balance(dec!(100));
        let mut engine = engine_with(broker.clone(), config());

        engine.stop().await;
        engine.stop().await;
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(engine.handle().state(), EngineState::Stopped);
        assert_eq!(*broker.disconnects.lock().unwrap(), 1);
        assert!(engine.start().await.is_err());
    }

    #[tokio::test]
    async fn test_start_runs_until_handle_stops() {
        let broker = FakeBroker::with_balance(dec!(100));
        let (tx, rx) = create_event_channel();
        let mut engine = TradingEngine::new("test", config(), broker.clone(), rx, from_entry(Cadence::new(1, 0)));
        let handle = engine.handle();

        tx.send(tick(dec!(100))).await.unwrap();
        tx.send(BrokerEvent::ContractOpened {
            contract_id: 9,
            buy_price: dec!(0.35),
        })
        .await
        .unwrap();
        tx.send(resolve(9, ContractStatus::Won, dec!(0.33))).await.unwrap();

        let observer = handle.clone();
        tokio::spawn(async move {
            while observer.stats().map_or(true, |s| s.total_trades == 0) {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
            observer.stop();
        });

        let summary = engine.start().await.unwrap();
        assert_eq!(summary.stats.wins, 1);
        assert_eq!(summary.stop_reason, Some(StopReason::External));
        assert_eq!(handle.state(), EngineState::Stopped);
        assert_eq!(handle.stop_reason(), Some(StopReason::External));
    }

    #[tokio::test]
    async fn test_connection_lost_is_reported() {
        let broker = FakeBroker::with_balance(dec!(100));
        let (tx, rx) = create_event_channel();
        let mut engine = TradingEngine::new("test", config(), broker, rx, from_entry(Cadence::new(1, 0)));

        tx.send(BrokerEvent::ConnectionLost {
            reason: "reconnect failed".to_string(),
            attempts: 3,
        })
        .await
        .unwrap();

        let result = engine.start().await;
        assert!(matches!(result, Err(BotError::ReconnectExhausted { attempts: 3 })));
        assert_eq!(engine.handle().stop_reason(), Some(StopReason::ConnectionLost));
    }

    #[tokio::test]
    async fn test_rejected_credential_leaves_session_stopped() {
        let mut broker = MockBrokerSession::new();
        broker.expect_connect().times(1).returning(|| Ok(()));
        broker.expect_authorize().times(1).returning(|_| {
            Err(BotError::AuthorizationRejected {
                code: "InvalidToken".to_string(),
                message: "The token is invalid.".to_string(),
            })
        });
        broker.expect_subscribe_ticks().never();
        broker.expect_disconnect().times(1).returning(|| Ok(()));

        let (_tx, rx) = create_event_channel();
        let mut engine = TradingEngine::new("test", config(), broker, rx, from_entry(Cadence::default()));

        let result = engine.start().await;
        assert!(matches!(result, Err(BotError::AuthorizationRejected { .. })));
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(engine.stop_reason().is_none());
    }

    #[tokio::test]
    async fn test_low_starting_balance_refused() {
        let mut broker = MockBrokerSession::new();
        broker.expect_connect().returning(|| Ok(()));
        broker.expect_authorize().returning(|_| {
            Ok(AccountSnapshot {
                balance: dec!(0.10),
                ..AccountSnapshot::default()
            })
        });
        broker.expect_disconnect().returning(|| Ok(()));

        let (_tx, rx) = create_event_channel();
        let mut engine = TradingEngine::new("test", config(), broker, rx, from_entry(Cadence::default()));

        let result = engine.start().await;
        assert!(matches!(result, Err(BotError::InsufficientBalance { .. })));
    }

    #[tokio::test]
    async fn test_invalid_config_never_connects() {
        let mut broker = MockBrokerSession::new();
        broker.expect_connect().never();
        broker.expect_disconnect().returning(|| Ok(()));

        let (_tx, rx) = create_event_channel();
        let mut engine = TradingEngine::new("test", AppConfig::default(), broker, rx, from_entry(Cadence::default()));

        let result = engine.start().await;
        assert!(matches!(result, Err(BotError::Configuration(_))));
    }
}
