//! Persistent websocket link to the Deriv API
//!
//! One `BrokerLink` owns three kinds of background work per session:
//!
//! - a reader task per transport, which parses inbound frames, answers quotes
//!   (auto-accept) and forwards `BrokerEvent`s in arrival order,
//! - a writer task per transport, which drains the outbound queue into the sink,
//! - one heartbeat task, which pings and forces a reconnect on inbound silence.
//!
//! The heartbeat and reader tasks only meet at the `ConnectionState` watch
//! and at the transport slot. Replacing the transport always goes through the
//! slot mutex, and a generation counter lets late reports from a replaced
//! transport be ignored.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, instrument, warn};

use super::messages::{parse_inbound, ApiError, Inbound, ProposalEcho, ProposalInfo, Request};
use crate::common::backoff::ReconnectBackoff;
use crate::common::channels::EventSender;
use crate::common::errors::{BotError, RequestStage, Result};
use crate::common::traits::BrokerSession;
use crate::common::types::{
    AccountSnapshot, BrokerEvent, ConnectionState, ContractUpdate, TradeRequest,
};
use crate::config::types::BrokerConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to the live transport
struct Transport {
    generation: u64,
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
}

impl Transport {
    fn shutdown(self) {
        // The writer sends the close frame and exits on its own.
        let _ = self.outbound.send(Message::Close(None));
        self.reader.abort();
        debug!(generation = self.generation, "Transport closed");
    }
}

/// The one trade request in progress on the link
#[derive(Debug, Clone)]
enum InFlight {
    /// Waiting for the quote
    Quote(TradeRequest),
    /// Quote accepted, waiting for the purchase receipt
    Purchase { proposal_id: String },
    /// The receipt was lost with the transport. The contract may exist;
    /// resolved by listing open contracts after the reconnect.
    Unconfirmed { proposal_id: String },
}

type TickWaiter = (String, oneshot::Sender<std::result::Result<(), ApiError>>);

struct LinkInner {
    config: BrokerConfig,
    basis: String,
    events: EventSender,
    state: watch::Sender<ConnectionState>,
    transport: Mutex<Option<Transport>>,
    generation: AtomicU64,
    reconnect_lock: tokio::sync::Mutex<()>,
    reconnect_enabled: AtomicBool,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    last_inbound: Mutex<Instant>,
    account: RwLock<AccountSnapshot>,
    credential: RwLock<Option<String>>,
    symbol: RwLock<Option<String>>,
    tracked: Mutex<HashSet<u64>>,
    in_flight: Mutex<Option<InFlight>>,
    auth_waiter: Mutex<Option<oneshot::Sender<std::result::Result<AccountSnapshot, ApiError>>>>,
    tick_waiter: Mutex<Option<TickWaiter>>,
}

/// Client for the Deriv real-time API
#[derive(Clone)]
pub struct BrokerLink {
    inner: Arc<LinkInner>,
}

impl BrokerLink {
    /// Create a link that reports events on `events`
    pub fn new(config: BrokerConfig, events: EventSender) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(LinkInner {
                config,
                basis: "stake".to_string(),
                events,
                state,
                transport: Mutex::new(None),
                generation: AtomicU64::new(0),
                reconnect_lock: tokio::sync::Mutex::new(()),
                reconnect_enabled: AtomicBool::new(false),
                heartbeat: Mutex::new(None),
                last_inbound: Mutex::new(Instant::now()),
                account: RwLock::new(AccountSnapshot::default()),
                credential: RwLock::new(None),
                symbol: RwLock::new(None),
                tracked: Mutex::new(HashSet::new()),
                in_flight: Mutex::new(None),
                auth_waiter: Mutex::new(None),
                tick_waiter: Mutex::new(None),
            }),
        }
    }

    /// Set the proposal basis ("stake" or "payout")
    pub fn with_basis(self, basis: impl Into<String>) -> Self {
        let mut inner = match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner,
            Err(shared) => return Self { inner: shared },
        };
        inner.basis = basis.into();
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Observe connection state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Latest account snapshot
    pub fn account(&self) -> AccountSnapshot {
        self.inner
            .account
            .read()
            .map(|account| account.clone())
            .unwrap_or_default()
    }

    /// Symbol that will be re-subscribed after a reconnect
    pub fn subscribed_symbol(&self) -> Option<String> {
        self.inner.symbol.read().ok().and_then(|s| s.clone())
    }

    /// Open the transport, waiting up to the connect timeout for the handshake.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<()> {
        if self.state().is_open() {
            debug!("Already connected");
            return Ok(());
        }
        info!("Connecting to Deriv API");
        self.inner.reconnect_enabled.store(true, Ordering::SeqCst);
        if let Err(e) = self.inner.open_transport().await {
            self.inner.reconnect_enabled.store(false, Ordering::SeqCst);
            return Err(e);
        }
        self.inner.ensure_heartbeat();
        Ok(())
    }

    /// Authorize the connection, waiting up to the authorize timeout.
    ///
    /// A rejected credential is returned as `AuthorizationRejected` and is not retried.
    #[instrument(skip(self, credential))]
    pub async fn authorize(&self, credential: &str) -> Result<AccountSnapshot> {
        if !self.state().is_open() {
            return Err(BotError::NotConnected);
        }
        let account = self.inner.authorize_inner(credential).await?;
        if let Ok(mut slot) = self.inner.credential.write() {
            *slot = Some(credential.to_string());
        }
        info!(
            balance = %account.balance,
            currency = %account.currency,
            "Authorized"
        );
        Ok(account)
    }

    /// Subscribe to ticks for `symbol`; a repeat call for the same symbol is a no-op.
    ///
    /// Returns once the first tick arrives. A refused symbol is returned as
    /// `BrokerRejected` with stage `Ticks`, and a stream that stays quiet past
    /// the subscribe timeout as `SubscriptionTimeout`.
    #[instrument(skip(self))]
    pub async fn subscribe_ticks(&self, symbol: &str) -> Result<()> {
        let state = self.state();
        if state < ConnectionState::Authorized {
            return Err(BotError::InvalidState(format!(
                "cannot subscribe while {}",
                state
            )));
        }
        if state == ConnectionState::Subscribed
            && self.subscribed_symbol().as_deref() == Some(symbol)
        {
            debug!(symbol = %symbol, "Already subscribed");
            return Ok(());
        }

        self.inner.subscribe_inner(symbol).await?;
        if let Ok(mut slot) = self.inner.symbol.write() {
            *slot = Some(symbol.to_string());
        }
        info!(symbol = %symbol, "Subscribed to ticks");
        Ok(())
    }

    /// Ask for a quote. The quote is bought automatically when it arrives.
    pub fn request_trade(&self, request: &TradeRequest) -> Result<()> {
        if self.state() < ConnectionState::Authorized {
            return Err(BotError::NotConnected);
        }
        {
            let mut slot = lock(&self.inner.in_flight);
            if slot.is_some() {
                return Err(BotError::InvalidState(
                    "a trade request is already in flight".to_string(),
                ));
            }
            *slot = Some(InFlight::Quote(request.clone()));
        }

        let currency = self.account().currency;
        let proposal = Request::proposal(request, &self.inner.basis, &currency);
        if let Err(e) = self.inner.send_request(&proposal) {
            lock(&self.inner.in_flight).take();
            return Err(e);
        }
        info!(
            contract_type = %request.contract_type,
            symbol = %request.symbol,
            amount = %request.amount,
            "Requested quote"
        );
        Ok(())
    }

    /// Subscribe to lifecycle updates for a contract
    pub fn track_contract(&self, contract_id: u64) -> Result<()> {
        self.inner.track_contract(contract_id)
    }

    /// Stop reconnecting, close the transport and reset to `Disconnected`.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) -> Result<()> {
        let inner = &self.inner;
        inner.reconnect_enabled.store(false, Ordering::SeqCst);
        if let Some(heartbeat) = lock(&inner.heartbeat).take() {
            heartbeat.abort();
        }
        inner.close_transport();
        lock(&inner.auth_waiter).take();
        lock(&inner.tick_waiter).take();
        lock(&inner.in_flight).take();
        inner.set_state(ConnectionState::Disconnected);
        info!("Disconnected from Deriv API");
        Ok(())
    }
}

impl LinkInner {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            debug!(state = %next, "Connection state changed");
            if let Err(e) = self.events.try_send(BrokerEvent::ConnectionStatus(next)) {
                debug!("Dropped connection status event: {}", e);
            }
        }
    }

    fn touch(&self) {
        *lock(&self.last_inbound) = Instant::now();
    }

    fn silent_for(&self) -> Duration {
        lock(&self.last_inbound).elapsed()
    }

    async fn emit(&self, event: BrokerEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Event receiver dropped");
        }
    }

    /// Queue a request on the current transport. Never blocks.
    fn send_request(self: &Arc<Self>, request: &Request) -> Result<()> {
        let text = request.to_json()?;
        let generation = {
            let slot = lock(&self.transport);
            let transport = slot.as_ref().ok_or(BotError::NotConnected)?;
            if transport.outbound.send(Message::Text(text)).is_ok() {
                return Ok(());
            }
            transport.generation
        };
        self.transport_lost(generation, "outbound queue closed".to_string());
        Err(BotError::WebSocketCommunication(
            "outbound queue closed".to_string(),
        ))
    }

    fn track_contract(self: &Arc<Self>, contract_id: u64) -> Result<()> {
        lock(&self.tracked).insert(contract_id);
        self.send_request(&Request::open_contract(contract_id))
    }

    fn close_transport(&self) {
        if let Some(transport) = lock(&self.transport).take() {
            transport.shutdown();
        }
    }

    fn ensure_heartbeat(self: &Arc<Self>) {
        let mut slot = lock(&self.heartbeat);
        let running = slot.as_ref().map_or(false, |handle| !handle.is_finished());
        if !running {
            *slot = Some(tokio::spawn(heartbeat_loop(
                Arc::downgrade(self),
                self.config.heartbeat_interval(),
            )));
        }
    }

    async fn open_transport(self: &Arc<Self>) -> Result<()> {
        let url = self.config.endpoint()?;
        self.set_state(ConnectionState::Connecting);

        let timeout = self.config.connect_timeout();
        let ws = match tokio::time::timeout(timeout, connect_async(url.as_str())).await {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(BotError::WebSocketConnection(e.to_string()));
            }
            Err(_) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(BotError::ConnectionTimeout(timeout));
            }
        };

        let (sink, stream) = ws.split();
        let (outbound, queue) = mpsc::unbounded_channel();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut slot = lock(&self.transport);
            if !self.reconnect_enabled.load(Ordering::SeqCst) {
                return Err(BotError::InvalidState(
                    "link closed while connecting".to_string(),
                ));
            }
            let weak = Arc::downgrade(self);
            tokio::spawn(write_loop(sink, queue, weak.clone(), generation));
            let reader = tokio::spawn(read_loop(stream, weak, generation));
            if let Some(previous) = slot.replace(Transport {
                generation,
                outbound,
                reader,
            }) {
                previous.shutdown();
            }
        }

        self.touch();
        self.set_state(ConnectionState::Connected);
        info!(generation, "WebSocket connection established");
        Ok(())
    }

    async fn authorize_inner(self: &Arc<Self>, credential: &str) -> Result<AccountSnapshot> {
        let (tx, rx) = oneshot::channel();
        *lock(&self.auth_waiter) = Some(tx);
        self.send_request(&Request::authorize(credential))?;

        let timeout = self.config.authorize_timeout();
        match tokio::time::timeout(timeout, rx).await {
            Err(_) => {
                lock(&self.auth_waiter).take();
                Err(BotError::AuthorizationTimeout(timeout))
            }
            Ok(Err(_)) => Err(BotError::NotConnected),
            Ok(Ok(Err(api))) => Err(BotError::AuthorizationRejected {
                code: api.code,
                message: api.message,
            }),
            Ok(Ok(Ok(account))) => {
                self.set_state(ConnectionState::Authorized);
                self.send_request(&Request::balance_stream())?;
                Ok(account)
            }
        }
    }

    /// Send the subscription and wait for the first tick of `symbol`.
    /// The reader moves the link to `Subscribed` before forwarding that tick.
    async fn subscribe_inner(self: &Arc<Self>, symbol: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        *lock(&self.tick_waiter) = Some((symbol.to_string(), tx));
        self.send_request(&Request::ticks(symbol))?;

        let timeout = self.config.subscribe_timeout();
        match tokio::time::timeout(timeout, rx).await {
            Err(_) => {
                lock(&self.tick_waiter).take();
                Err(BotError::SubscriptionTimeout {
                    symbol: symbol.to_string(),
                    after: timeout,
                })
            }
            Ok(Err(_)) => Err(BotError::NotConnected),
            Ok(Ok(Err(api))) => Err(BotError::BrokerRejected {
                stage: RequestStage::Ticks,
                code: api.code,
                message: api.message,
            }),
            Ok(Ok(Ok(()))) => Ok(()),
        }
    }

    /// Report a dead transport. Reports from a replaced transport are ignored.
    fn transport_lost(self: &Arc<Self>, generation: u64, reason: String) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        if !self.reconnect_enabled.load(Ordering::SeqCst) {
            self.set_state(ConnectionState::Disconnected);
            return;
        }
        warn!(generation, reason = %reason, "Transport lost");
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.reconnect(generation, reason).await;
        });
    }

    /// Replace the transport and replay connect, authorize and re-subscribe.
    async fn reconnect(self: Arc<Self>, observed_generation: u64, reason: String) {
        let Ok(_guard) = self.reconnect_lock.try_lock() else {
            debug!("Reconnect already in progress");
            return;
        };
        if self.generation.load(Ordering::SeqCst) != observed_generation
            || !self.reconnect_enabled.load(Ordering::SeqCst)
        {
            return;
        }

        warn!(reason = %reason, "Forcing reconnect");
        self.close_transport();
        self.set_state(ConnectionState::Disconnected);
        self.fail_in_flight().await;

        let mut backoff = ReconnectBackoff::from_config(&self.config);

        loop {
            let Some(delay) = backoff.next_attempt() else {
                let attempts = backoff.attempts();
                error!(attempts, "Reconnect budget exhausted");
                self.reconnect_enabled.store(false, Ordering::SeqCst);
                self.emit(BrokerEvent::ConnectionLost {
                    reason: format!("reconnect failed after {} attempts: {}", attempts, reason),
                    attempts,
                })
                .await;
                return;
            };
            let attempts = backoff.attempts();

            tokio::time::sleep(delay).await;
            if !self.reconnect_enabled.load(Ordering::SeqCst) {
                return;
            }

            match self.replay().await {
                Ok(()) => {
                    info!(attempts, "Reconnected");
                    return;
                }
                Err(BotError::AuthorizationRejected { code, message }) => {
                    error!(code = %code, message = %message, "Credential rejected while reconnecting");
                    self.reconnect_enabled.store(false, Ordering::SeqCst);
                    self.close_transport();
                    self.set_state(ConnectionState::Disconnected);
                    self.emit(BrokerEvent::ConnectionLost {
                        reason: format!("authorization rejected ({}): {}", code, message),
                        attempts,
                    })
                    .await;
                    return;
                }
                Err(BotError::BrokerRejected {
                    stage,
                    code,
                    message,
                }) => {
                    error!(stage = %stage, code = %code, message = %message, "Request refused while reconnecting");
                    self.reconnect_enabled.store(false, Ordering::SeqCst);
                    self.close_transport();
                    self.set_state(ConnectionState::Disconnected);
                    self.emit(BrokerEvent::RequestRejected {
                        stage,
                        code,
                        message,
                    })
                    .await;
                    return;
                }
                Err(e) => {
                    warn!(attempt = attempts, error = %e, "Reconnect attempt failed");
                    self.close_transport();
                    self.set_state(ConnectionState::Disconnected);
                }
            }
        }
    }

    async fn replay(self: &Arc<Self>) -> Result<()> {
        self.open_transport().await?;

        let credential = self.credential.read().ok().and_then(|c| c.clone());
        let Some(credential) = credential else {
            return Ok(());
        };
        self.authorize_inner(&credential).await?;

        let symbol = self.symbol.read().ok().and_then(|s| s.clone());
        if let Some(symbol) = symbol {
            self.subscribe_inner(&symbol).await?;
            info!(symbol = %symbol, "Re-subscribed to ticks");
        }

        let tracked: Vec<u64> = lock(&self.tracked).iter().copied().collect();
        for contract_id in tracked {
            self.send_request(&Request::open_contract(contract_id))?;
            debug!(contract_id, "Re-tracking contract");
        }

        let unconfirmed = matches!(*lock(&self.in_flight), Some(InFlight::Unconfirmed { .. }));
        if unconfirmed {
            self.send_request(&Request::open_contracts())?;
            info!("Looking for a contract bought before the reset");
        }
        Ok(())
    }

    /// A request that was waiting on the old transport will never be answered.
    ///
    /// A quote is failed outright. A purchase may already have gone through,
    /// so it stays in flight until the open contracts are listed.
    async fn fail_in_flight(&self) {
        let stage = {
            let mut slot = lock(&self.in_flight);
            match slot.take() {
                None => return,
                Some(InFlight::Quote(_)) => RequestStage::Proposal,
                Some(InFlight::Purchase { proposal_id })
                | Some(InFlight::Unconfirmed { proposal_id }) => {
                    warn!(proposal_id = %proposal_id, "Purchase receipt lost with the transport");
                    *slot = Some(InFlight::Unconfirmed { proposal_id });
                    return;
                }
            }
        };
        self.emit(BrokerEvent::RequestRejected {
            stage,
            code: "TransportReset".to_string(),
            message: "transport reset before the brokerage answered".to_string(),
        })
        .await;
    }

    /// Take the in-flight slot if it holds an unconfirmed purchase
    fn take_unconfirmed(&self) -> Option<String> {
        let mut slot = lock(&self.in_flight);
        match slot.take() {
            Some(InFlight::Unconfirmed { proposal_id }) => Some(proposal_id),
            other => {
                *slot = other;
                None
            }
        }
    }

    async fn handle_text(self: &Arc<Self>, text: &str) {
        let inbound = match parse_inbound(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!("Failed to parse message: {} - {}", e, text);
                return;
            }
        };

        match inbound {
            Inbound::Authorize(result) => {
                let outcome = result.map(|info| {
                    let account = AccountSnapshot {
                        login_id: info.loginid,
                        balance: info.balance,
                        currency: info.currency,
                        is_virtual: info.is_virtual.unwrap_or(0) == 1,
                    };
                    if let Ok(mut slot) = self.account.write() {
                        *slot = account.clone();
                    }
                    account
                });
                if let Err(api) = &outcome {
                    error!(code = %api.code, "Authorization error: {}", api.message);
                }
                if let Some(waiter) = lock(&self.auth_waiter).take() {
                    let _ = waiter.send(outcome);
                }
            }
            Inbound::Balance(info) => {
                if let Ok(mut account) = self.account.write() {
                    account.balance = info.balance;
                    if let Some(currency) = info.currency {
                        account.currency = currency;
                    }
                }
                self.emit(BrokerEvent::Balance(info.balance)).await;
            }
            Inbound::Tick(Ok(tick)) => {
                let waiter = {
                    let mut slot = lock(&self.tick_waiter);
                    match slot.take() {
                        Some((symbol, waiter)) if symbol == tick.symbol => Some(waiter),
                        other => {
                            *slot = other;
                            None
                        }
                    }
                };
                if let Some(waiter) = waiter {
                    self.set_state(ConnectionState::Subscribed);
                    let _ = waiter.send(Ok(()));
                }
                self.emit(BrokerEvent::Tick(tick.into_record())).await;
            }
            Inbound::Tick(Err(api)) => {
                warn!(code = %api.code, "Tick stream error: {}", api.message);
                let waiter = lock(&self.tick_waiter).take();
                match waiter {
                    Some((_, waiter)) => {
                        let _ = waiter.send(Err(api));
                    }
                    None => {
                        self.emit(BrokerEvent::RequestRejected {
                            stage: RequestStage::Ticks,
                            code: api.code,
                            message: api.message,
                        })
                        .await;
                    }
                }
            }
            Inbound::Proposal { result, echo } => self.on_proposal(result, echo).await,
            Inbound::Buy(result) => {
                lock(&self.in_flight).take();
                match result {
                    Ok(receipt) => {
                        info!(
                            contract_id = receipt.contract_id,
                            buy_price = %receipt.buy_price,
                            "Contract purchased"
                        );
                        if let Some(balance) = receipt.balance_after {
                            if let Ok(mut account) = self.account.write() {
                                account.balance = balance;
                            }
                        }
                        if let Err(e) = self.track_contract(receipt.contract_id) {
                            warn!(contract_id = receipt.contract_id, error = %e, "Failed to track contract");
                        }
                        self.emit(BrokerEvent::ContractOpened {
                            contract_id: receipt.contract_id,
                            buy_price: receipt.buy_price,
                        })
                        .await;
                    }
                    Err(api) => {
                        warn!(code = %api.code, "Purchase rejected: {}", api.message);
                        self.emit(BrokerEvent::RequestRejected {
                            stage: RequestStage::Buy,
                            code: api.code,
                            message: api.message,
                        })
                        .await;
                    }
                }
            }
            Inbound::OpenContract(Ok(info)) => {
                let Some(contract_id) = info.contract_id else {
                    match self.take_unconfirmed() {
                        Some(proposal_id) => {
                            warn!(proposal_id = %proposal_id, "No open contract after the reset, purchase did not go through");
                            self.emit(BrokerEvent::RequestRejected {
                                stage: RequestStage::Buy,
                                code: "TransportReset".to_string(),
                                message: "no contract was opened before the transport reset".to_string(),
                            })
                            .await;
                        }
                        None => debug!("Contract update without id"),
                    }
                    return;
                };
                let untracked = !lock(&self.tracked).contains(&contract_id);
                if untracked {
                    // Contracts resolved earlier or opened elsewhere on the account
                    let Some(proposal_id) = self.take_unconfirmed() else {
                        debug!(contract_id, "Update for a contract not tracked");
                        return;
                    };
                    let buy_price = info.buy_price.unwrap_or_default();
                    info!(contract_id, proposal_id = %proposal_id, buy_price = %buy_price, "Recovered contract bought before the reset");
                    lock(&self.tracked).insert(contract_id);
                    self.emit(BrokerEvent::ContractOpened {
                        contract_id,
                        buy_price,
                    })
                    .await;
                }
                let status = info.resolution();
                let profit = info.profit.unwrap_or_default();
                if status.is_terminal() {
                    lock(&self.tracked).remove(&contract_id);
                    info!(contract_id, ?status, profit = %profit, "Contract resolved");
                }
                self.emit(BrokerEvent::ContractUpdated(ContractUpdate {
                    contract_id,
                    status,
                    profit,
                }))
                .await;
            }
            Inbound::OpenContract(Err(api)) => {
                warn!(code = %api.code, "Contract tracking error: {}", api.message);
                self.emit(BrokerEvent::RequestRejected {
                    stage: RequestStage::Contract,
                    code: api.code,
                    message: api.message,
                })
                .await;
            }
            Inbound::Pong => debug!("Received pong"),
            Inbound::Other { msg_type, error } => match error {
                Some(api) => warn!(msg_type = %msg_type, code = %api.code, "{}", api.message),
                None => debug!(msg_type = %msg_type, "Unhandled message"),
            },
        }
    }

    async fn on_proposal(
        self: &Arc<Self>,
        result: std::result::Result<ProposalInfo, ApiError>,
        echo: ProposalEcho,
    ) {
        let request = {
            let mut slot = lock(&self.in_flight);
            match slot.take() {
                Some(InFlight::Quote(request)) => Some(request),
                other => {
                    *slot = other;
                    None
                }
            }
        };

        let quote = match result {
            Ok(quote) => quote,
            Err(api) => {
                warn!(code = %api.code, "Quote rejected: {}", api.message);
                if request.is_some() {
                    self.emit(BrokerEvent::RequestRejected {
                        stage: RequestStage::Proposal,
                        code: api.code,
                        message: api.message,
                    })
                    .await;
                }
                return;
            }
        };

        let Some(request) = request else {
            warn!(proposal_id = %quote.id, "Ignoring quote with no request waiting");
            return;
        };

        if let Err(reason) = validate_quote(&request, &quote, &echo) {
            warn!(proposal_id = %quote.id, "Refusing quote: {}", reason);
            self.emit(BrokerEvent::RequestRejected {
                stage: RequestStage::Proposal,
                code: "QuoteMismatch".to_string(),
                message: reason,
            })
            .await;
            return;
        }

        info!(proposal_id = %quote.id, price = %quote.ask_price, "Accepting quote");
        *lock(&self.in_flight) = Some(InFlight::Purchase {
            proposal_id: quote.id.clone(),
        });
        if let Err(e) = self.send_request(&Request::buy(&quote.id, quote.ask_price)) {
            lock(&self.in_flight).take();
            self.emit(BrokerEvent::RequestRejected {
                stage: RequestStage::Buy,
                code: "SendFailed".to_string(),
                message: e.to_string(),
            })
            .await;
        }
    }
}

/// Quotes are only bought if they match what was asked for.
fn validate_quote(
    request: &TradeRequest,
    quote: &ProposalInfo,
    echo: &ProposalEcho,
) -> std::result::Result<(), String> {
    if let Some(contract_type) = echo.contract_type.as_deref() {
        if contract_type != request.contract_type.as_str() {
            return Err(format!(
                "quote is for {} but {} was requested",
                contract_type, request.contract_type
            ));
        }
    }
    if let Some(amount) = echo.amount {
        if amount != request.amount {
            return Err(format!(
                "quote is for amount {} but {} was requested",
                amount, request.amount
            ));
        }
    }
    if quote.ask_price > request.amount {
        return Err(format!(
            "ask price {} exceeds requested stake {}",
            quote.ask_price, request.amount
        ));
    }
    if quote.ask_price <= Decimal::ZERO {
        return Err(format!("ask price {} is not positive", quote.ask_price));
    }
    Ok(())
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut queue: mpsc::UnboundedReceiver<Message>,
    link: Weak<LinkInner>,
    generation: u64,
) {
    while let Some(message) = queue.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            if !closing {
                if let Some(inner) = link.upgrade() {
                    inner.transport_lost(generation, format!("send failed: {}", e));
                }
            }
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(mut stream: SplitStream<WsStream>, link: Weak<LinkInner>, generation: u64) {
    let reason = loop {
        let frame = stream.next().await;
        let Some(inner) = link.upgrade() else {
            return;
        };
        match frame {
            Some(Ok(Message::Text(text))) => {
                inner.touch();
                inner.handle_text(&text).await;
            }
            Some(Ok(Message::Close(frame))) => {
                break format!("closed by server: {:?}", frame);
            }
            Some(Ok(_)) => inner.touch(),
            Some(Err(e)) => break format!("websocket error: {}", e),
            None => break "stream ended".to_string(),
        }
    };

    if let Some(inner) = link.upgrade() {
        inner.transport_lost(generation, reason);
    }
}

async fn heartbeat_loop(link: Weak<LinkInner>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(inner) = link.upgrade() else {
            break;
        };
        if !inner.reconnect_enabled.load(Ordering::SeqCst) {
            break;
        }
        if !inner.state().is_open() {
            continue;
        }

        if let Err(e) = inner.send_request(&Request::ping()) {
            debug!("Ping not sent: {}", e);
        }

        let silent_for = inner.silent_for();
        if silent_for > inner.config.silence_threshold() {
            warn!(silent_ms = silent_for.as_millis() as u64, "No inbound traffic, reconnecting");
            let generation = inner.generation.load(Ordering::SeqCst);
            Arc::clone(&inner)
                .reconnect(generation, format!("no message for {:?}", silent_for))
                .await;
        }
    }
}

#[async_trait]
impl BrokerSession for BrokerLink {
    async fn connect(&self) -> Result<()> {
        BrokerLink::connect(self).await
    }

    async fn authorize(&self, credential: &str) -> Result<AccountSnapshot> {
        BrokerLink::authorize(self, credential).await
    }

    async fn subscribe_ticks(&self, symbol: &str) -> Result<()> {
        BrokerLink::subscribe_ticks(self, symbol).await
    }

    async fn disconnect(&self) -> Result<()> {
        BrokerLink::disconnect(self).await
    }

    fn state(&self) -> ConnectionState {
        BrokerLink::state(self)
    }

    fn balance(&self) -> Decimal {
        self.account().balance
    }

    fn request_trade(&self, request: &TradeRequest) -> Result<()> {
        BrokerLink::request_trade(self, request)
    }

    fn track_contract(&self, contract_id: u64) -> Result<()> {
        BrokerLink::track_contract(self, contract_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::channels::create_event_channel;
    use crate::common::types::{ContractType, DurationUnit};
    use rust_decimal_macros::dec;

    fn request(amount: Decimal) -> TradeRequest {
        TradeRequest {
            contract_type: ContractType::Call,
            symbol: "R_100".to_string(),
            amount,
            duration: 1,
            duration_unit: DurationUnit::Ticks,
            barrier: None,
        }
    }

    fn quote(price: Decimal) -> ProposalInfo {
        ProposalInfo {
            id: "prop-1".to_string(),
            ask_price: price,
            payout: Some(dec!(0.69)),
        }
    }

    #[test]
    fn test_matching_quote_accepted() {
        let echo = ProposalEcho {
            contract_type: Some("CALL".to_string()),
            amount: Some(dec!(0.7)),
        };
        assert!(validate_quote(&request(dec!(0.70)), &quote(dec!(0.70)), &echo).is_ok());
    }

    #[test]
    fn test_mismatched_quote_refused() {
        let wrong_type = ProposalEcho {
            contract_type: Some("PUT".to_string()),
            amount: None,
        };
        assert!(validate_quote(&request(dec!(0.35)), &quote(dec!(0.35)), &wrong_type).is_err());

        let wrong_amount = ProposalEcho {
            contract_type: None,
            amount: Some(dec!(1.40)),
        };
        assert!(validate_quote(&request(dec!(0.35)), &quote(dec!(0.35)), &wrong_amount).is_err());

        let no_echo = ProposalEcho::default();
        let err = validate_quote(&request(dec!(0.35)), &quote(dec!(0.50)), &no_echo).unwrap_err();
        assert!(err.contains("exceeds"));
    }

    #[tokio::test]
    async fn test_link_starts_disconnected() {
        let (tx, _rx) = create_event_channel();
        let link = BrokerLink::new(BrokerConfig::default(), tx);
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert!(link.subscribed_symbol().is_none());
        assert!(matches!(
            link.request_trade(&request(dec!(0.35))),
            Err(BotError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let (tx, _rx) = create_event_channel();
        let link = BrokerLink::new(BrokerConfig::default(), tx);
        assert!(matches!(
            link.authorize("token").await,
            Err(BotError::NotConnected)
        ));
        assert!(matches!(
            link.subscribe_ticks("R_100").await,
            Err(BotError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (tx, _rx) = create_event_channel();
        let link = BrokerLink::new(BrokerConfig::default(), tx);
        assert!(link.disconnect().await.is_ok());
        assert!(link.disconnect().await.is_ok());
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_failure_resets_state() {
        let (tx, _rx) = create_event_channel();
        let config = BrokerConfig {
            websocket_url: "ws://127.0.0.1:1/websockets/v3".to_string(),
            connect_timeout_ms: 500,
            ..BrokerConfig::default()
        };
        let link = BrokerLink::new(config, tx);
        let result = link.connect().await;
        assert!(result.is_err());
        assert!(result.unwrap_err().is_transport());
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }
}
