//! Channel type definitions for inter-task communication

use tokio::sync::mpsc;

use super::types::BrokerEvent;

/// Default channel buffer size
pub const DEFAULT_CHANNEL_SIZE: usize = 1000;

pub type EventSender = mpsc::Sender<BrokerEvent>;
pub type EventReceiver = mpsc::Receiver<BrokerEvent>;

/// Create a new broker event channel with the default buffer size
pub fn create_event_channel() -> (EventSender, EventReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_SIZE)
}
