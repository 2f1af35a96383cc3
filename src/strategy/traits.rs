use crate::common::errors::StrategyError;
use crate::common::types::TickRecord;
use crate::strategy::history::TickHistory;
use crate::strategy::types::{ContractParams, Direction, Signal};

/// Strategy that reads the engine's tick history
///
/// # Implementation Notes
///
/// - `produce_signal` runs on the engine's event loop - no blocking I/O
/// - Return `Ok(None)` when there is nothing to do this tick
/// - An `Err` is logged by the engine and treated as "no signal"
///
/// # Example
///
/// ```ignore
/// struct AlwaysUp;
///
/// impl HistoryStrategy for AlwaysUp {
///     fn name(&self) -> &str { "always_up" }
///
///     fn produce_signal(&mut self, history: &TickHistory) -> Result<Option<Signal>, StrategyError> {
///         Ok(history.latest().map(|_| Signal::up(0.5)))
///     }
/// }
/// ```
pub trait HistoryStrategy: Send {
    /// Unique identifier for this strategy
    fn name(&self) -> &str;

    /// Evaluate the recency-ordered history (oldest first)
    fn produce_signal(&mut self, history: &TickHistory) -> Result<Option<Signal>, StrategyError>;
}

/// A yes/no entry decision from an entry-shaped strategy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entry {
    pub direction: Direction,
    pub confidence: f64,
}

impl Entry {
    pub fn new(direction: Direction, confidence: f64) -> Self {
        Self {
            direction,
            confidence,
        }
    }
}

/// Strategy that only sees the latest tick and keeps its own history
pub trait EntryStrategy: Send {
    /// Unique identifier for this strategy
    fn name(&self) -> &str;

    /// Decide whether to enter on this tick
    fn should_enter(&mut self, tick: &TickRecord) -> Result<Option<Entry>, StrategyError>;

    /// Contract parameters for an entry in `direction`
    ///
    /// Default implementation defers everything to configuration.
    fn contract_params(&self, _direction: Direction) -> ContractParams {
        ContractParams::default()
    }
}

/// The single interface the engine evaluates strategies through
///
/// Both strategy shapes are wrapped once, at construction, by an adapter.
pub trait SignalSource: Send {
    fn name(&self) -> &str;

    fn evaluate(&mut self, history: &TickHistory) -> Result<Option<Signal>, StrategyError>;
}

/// Boxed signal source for dynamic dispatch
pub type BoxedSignalSource = Box<dyn SignalSource>;

/// Adapter for history-shaped strategies with a minimum-history gate
pub struct HistoryAdapter<S> {
    strategy: S,
    min_history: usize,
}

impl<S: HistoryStrategy> HistoryAdapter<S> {
    pub fn new(strategy: S, min_history: usize) -> Self {
        Self {
            strategy,
            min_history,
        }
    }
}

impl<S: HistoryStrategy> SignalSource for HistoryAdapter<S> {
    fn name(&self) -> &str {
        self.strategy.name()
    }

    fn evaluate(&mut self, history: &TickHistory) -> Result<Option<Signal>, StrategyError> {
        if history.len() < self.min_history {
            return Ok(None);
        }
        self.strategy.produce_signal(history)
    }
}

/// Adapter for entry-shaped strategies; feeds them the newest tick only
pub struct EntryAdapter<S> {
    strategy: S,
}

impl<S: EntryStrategy> EntryAdapter<S> {
    pub fn new(strategy: S) -> Self {
        Self { strategy }
    }
}

impl<S: EntryStrategy> SignalSource for EntryAdapter<S> {
    fn name(&self) -> &str {
        self.strategy.name()
    }

    fn evaluate(&mut self, history: &TickHistory) -> Result<Option<Signal>, StrategyError> {
        let Some(tick) = history.latest() else {
            return Ok(None);
        };
        let signal = self.strategy.should_enter(tick)?.map(|entry| {
            Signal::new(entry.direction, entry.confidence)
                .with_params(self.strategy.contract_params(entry.direction))
        });
        Ok(signal)
    }
}

/// Wrap a history-shaped strategy
pub fn from_history<S: HistoryStrategy + 'static>(strategy: S, min_history: usize) -> BoxedSignalSource {
    Box::new(HistoryAdapter::new(strategy, min_history))
}

/// Wrap an entry-shaped strategy
pub fn from_entry<S: EntryStrategy + 'static>(strategy: S) -> BoxedSignalSource {
    Box::new(EntryAdapter::new(strategy))
}
