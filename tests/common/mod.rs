//! Common test utilities: an in-process mock of the Deriv websocket API
//!
//! The mock listens on a loopback port, answers authorize, balance, ticks,
//! proposal, buy, proposal_open_contract and ping, and records every request
//! it receives together with the index of the connection it arrived on.

#![allow(dead_code)]

use binary_trader::config::types::BrokerConfig;
use binary_trader::{AppConfig, BrokerEvent, ConnectionState};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message};

pub const TEST_TOKEN: &str = "a1-test-token";

/// What happens to the first purchase on the first connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LostReceipt {
    /// The contract opens but the receipt never leaves the server
    Filled,
    /// Neither the contract nor the receipt
    Unfilled,
}

/// How the mock brokerage behaves
#[derive(Debug, Clone)]
pub struct Script {
    /// Refuse every authorize request
    pub reject_token: bool,
    /// Balance reported on authorize and on the balance stream
    pub balance: f64,
    /// Stream ticks every this often once subscribed
    pub tick_every: Duration,
    /// Answer every tick subscription with an InvalidSymbol error
    pub reject_ticks: bool,
    /// Stop answering anything on the first connection after its first tick
    pub silence_first_connection: bool,
    /// Go quiet on the first connection when its first buy arrives
    pub lose_first_receipt: Option<LostReceipt>,
    /// Refuse every buy with InsufficientBalance
    pub reject_buy: bool,
    /// Added to the requested amount when quoting
    pub quote_markup: f64,
    /// Resolve every contract as won (profit = 95% of stake) or lost
    pub contracts_win: bool,
    /// Delay between the open update and the final update of a contract
    pub settle_after: Duration,
    /// Drop connections beyond this many before the websocket handshake
    pub max_connections: Option<usize>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            reject_token: false,
            balance: 1000.0,
            tick_every: Duration::from_millis(20),
            reject_ticks: false,
            silence_first_connection: false,
            lose_first_receipt: None,
            reject_buy: false,
            quote_markup: 0.0,
            contracts_win: true,
            settle_after: Duration::from_millis(20),
            max_connections: None,
        }
    }
}

struct ServerState {
    script: Script,
    connections: AtomicUsize,
    next_id: AtomicU64,
    received: Mutex<Vec<(usize, Value)>>,
    receipt_lost: AtomicBool,
    /// Contracts opened without a receipt, as (contract id, buy price)
    unreported: Mutex<Vec<(u64, f64)>>,
}

/// Running mock brokerage
pub struct MockDeriv {
    pub url: String,
    state: Arc<ServerState>,
    accept_task: JoinHandle<()>,
}

impl MockDeriv {
    pub async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock brokerage");
        let addr = listener.local_addr().expect("local addr");
        let state = Arc::new(ServerState {
            script,
            connections: AtomicUsize::new(0),
            next_id: AtomicU64::new(1000),
            received: Mutex::new(Vec::new()),
            receipt_lost: AtomicBool::new(false),
            unreported: Mutex::new(Vec::new()),
        });

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let index = accept_state.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, index, Arc::clone(&accept_state)));
            }
        });

        Self {
            url: format!("ws://{}/websockets/v3", addr),
            state,
            accept_task,
        }
    }

    /// Number of websocket connections accepted so far
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// All requests received, as (connection index, request)
    pub fn received(&self) -> Vec<(usize, Value)> {
        self.state.received.lock().unwrap().clone()
    }

    /// Requests carrying `key` that arrived on connection `index`
    pub fn requests_on(&self, index: usize, key: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|(i, request)| *i == index && request.get(key).is_some())
            .map(|(_, request)| request)
            .collect()
    }

    /// Requests carrying `key` on any connection
    pub fn requests(&self, key: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|(_, request)| request.get(key).is_some())
            .map(|(_, request)| request)
            .collect()
    }

    /// Broker settings pointing at this mock with short test timings
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            websocket_url: self.url.clone(),
            api_token: Some(TEST_TOKEN.to_string()),
            connect_timeout_ms: 2_000,
            authorize_timeout_ms: 2_000,
            subscribe_timeout_ms: 2_000,
            heartbeat_interval_ms: 50,
            silence_threshold_ms: 300,
            reconnect_delay_ms: 50,
            max_reconnect_delay_ms: 200,
            ..BrokerConfig::default()
        }
    }

    /// Complete app settings pointing at this mock
    pub fn app_config(&self) -> AppConfig {
        let mut config = AppConfig::default();
        config.broker = self.broker_config();
        config
    }
}

impl Drop for MockDeriv {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve(stream: TcpStream, index: usize, state: Arc<ServerState>) {
    if state.script.max_connections.map_or(false, |limit| index >= limit) {
        drop(stream);
        return;
    }
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(_) => return,
    };
    let (mut sink, mut source) = ws.split();
    let (out, mut queue) = mpsc::unbounded_channel::<Value>();

    let writer = tokio::spawn(async move {
        while let Some(value) = queue.recv().await {
            if sink.send(Message::Text(value.to_string())).await.is_err() {
                break;
            }
        }
    });

    let mut background: Vec<JoinHandle<()>> = Vec::new();
    let silent = Arc::new(AtomicBool::new(false));

    while let Some(Ok(message)) = source.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(request) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        state.received.lock().unwrap().push((index, request.clone()));

        if silent.load(Ordering::SeqCst) {
            continue;
        }
        if let Some(task) = respond(&request, index, &state, &out, &silent) {
            background.push(task);
        }
    }

    for task in background {
        task.abort();
    }
    writer.abort();
}

fn respond(
    request: &Value,
    index: usize,
    state: &Arc<ServerState>,
    out: &mpsc::UnboundedSender<Value>,
    silent: &Arc<AtomicBool>,
) -> Option<JoinHandle<()>> {
    let script = &state.script;

    if let Some(token) = request.get("authorize") {
        let reply = if script.reject_token || token.as_str() != Some(TEST_TOKEN) {
            json!({
                "msg_type": "authorize",
                "echo_req": request,
                "error": {"code": "InvalidToken", "message": "The token is invalid."}
            })
        } else {
            json!({
                "msg_type": "authorize",
                "echo_req": request,
                "authorize": {
                    "balance": script.balance,
                    "currency": "USD",
                    "loginid": "VRTC1234567",
                    "is_virtual": 1
                }
            })
        };
        let _ = out.send(reply);
        return None;
    }

    if request.get("balance").is_some() {
        let _ = out.send(json!({
            "msg_type": "balance",
            "echo_req": request,
            "balance": {"balance": script.balance, "currency": "USD"}
        }));
        return None;
    }

    if let Some(symbol) = request.get("ticks").and_then(Value::as_str) {
        if script.reject_ticks {
            let _ = out.send(json!({
                "msg_type": "tick",
                "echo_req": request,
                "error": {"code": "InvalidSymbol", "message": format!("Symbol {} is invalid.", symbol)}
            }));
            return None;
        }
        let symbol = symbol.to_string();
        let out = out.clone();
        let every = script.tick_every;
        let quiet_after_first = script.silence_first_connection && index == 0;
        let silent = Arc::clone(silent);
        return Some(tokio::spawn(async move {
            let mut quote = 1000.0_f64;
            let mut epoch = 1_700_000_000_i64;
            loop {
                tokio::time::sleep(every).await;
                if silent.load(Ordering::SeqCst) {
                    break;
                }
                if quiet_after_first {
                    silent.store(true, Ordering::SeqCst);
                }
                quote += 0.13;
                epoch += 1;
                let tick = json!({
                    "msg_type": "tick",
                    "tick": {"symbol": symbol, "quote": (quote * 100.0).round() / 100.0, "epoch": epoch}
                });
                if out.send(tick).is_err() {
                    break;
                }
            }
        }));
    }

    if request.get("proposal").is_some() {
        let amount = request.get("amount").and_then(Value::as_f64).unwrap_or(0.0);
        let id = state.next_id.fetch_add(1, Ordering::SeqCst);
        let ask = ((amount + script.quote_markup) * 100.0).round() / 100.0;
        let _ = out.send(json!({
            "msg_type": "proposal",
            "echo_req": request,
            "proposal": {
                "id": format!("prop-{}", id),
                "ask_price": ask,
                "payout": ((amount * 1.95) * 100.0).round() / 100.0
            }
        }));
        return None;
    }

    if request.get("buy").is_some() {
        let price = request.get("price").and_then(Value::as_f64).unwrap_or(0.0);
        if script.reject_buy {
            let _ = out.send(json!({
                "msg_type": "buy",
                "echo_req": request,
                "error": {
                    "code": "InsufficientBalance",
                    "message": "Your account balance is insufficient for this transaction."
                }
            }));
            return None;
        }
        if let Some(outage) = script.lose_first_receipt {
            if index == 0 && !state.receipt_lost.swap(true, Ordering::SeqCst) {
                if outage == LostReceipt::Filled {
                    let contract_id = state.next_id.fetch_add(1, Ordering::SeqCst);
                    state.unreported.lock().unwrap().push((contract_id, price));
                }
                silent.store(true, Ordering::SeqCst);
                return None;
            }
        }
        let contract_id = state.next_id.fetch_add(1, Ordering::SeqCst);
        let _ = out.send(json!({
            "msg_type": "buy",
            "echo_req": request,
            "buy": {
                "contract_id": contract_id,
                "buy_price": price,
                "balance_after": script.balance - price,
                "transaction_id": contract_id * 2
            }
        }));
        return None;
    }

    if request.get("proposal_open_contract").is_some() {
        let contracts: Vec<(u64, f64)> = match request.get("contract_id").and_then(Value::as_u64) {
            Some(contract_id) => vec![(contract_id, 0.35)],
            None => state.unreported.lock().unwrap().drain(..).collect(),
        };
        if contracts.is_empty() {
            let _ = out.send(json!({
                "msg_type": "proposal_open_contract",
                "echo_req": request,
                "proposal_open_contract": {}
            }));
            return None;
        }
        let out = out.clone();
        let win = script.contracts_win;
        let settle_after = script.settle_after;
        return Some(tokio::spawn(async move {
            for (contract_id, buy_price) in &contracts {
                let _ = out.send(json!({
                    "msg_type": "proposal_open_contract",
                    "proposal_open_contract": {
                        "contract_id": contract_id,
                        "buy_price": buy_price,
                        "status": "open",
                        "profit": 0.0
                    }
                }));
            }
            tokio::time::sleep(settle_after).await;
            let (status, profit) = if win { ("won", 0.33) } else { ("lost", -0.35) };
            for (contract_id, buy_price) in &contracts {
                let _ = out.send(json!({
                    "msg_type": "proposal_open_contract",
                    "proposal_open_contract": {
                        "contract_id": contract_id,
                        "buy_price": buy_price,
                        "status": status,
                        "profit": profit,
                        "is_sold": 1
                    }
                }));
            }
        }));
    }

    if request.get("ping").is_some() {
        let _ = out.send(json!({"msg_type": "ping", "echo_req": request, "ping": "pong"}));
    }
    None
}

/// Wait for an event matching `predicate`, collecting everything seen on the way
pub async fn wait_for_event<F>(
    rx: &mut mpsc::Receiver<BrokerEvent>,
    within: Duration,
    mut predicate: F,
) -> Option<Vec<BrokerEvent>>
where
    F: FnMut(&BrokerEvent) -> bool,
{
    let mut seen = Vec::new();
    let result = timeout(within, async {
        while let Some(event) = rx.recv().await {
            let done = predicate(&event);
            seen.push(event);
            if done {
                return true;
            }
        }
        false
    })
    .await;

    match result {
        Ok(true) => Some(seen),
        _ => None,
    }
}

/// Connection states found in a list of events, in order
pub fn states_in(events: &[BrokerEvent]) -> Vec<ConnectionState> {
    events
        .iter()
        .filter_map(|event| match event {
            BrokerEvent::ConnectionStatus(state) => Some(*state),
            _ => None,
        })
        .collect()
}
