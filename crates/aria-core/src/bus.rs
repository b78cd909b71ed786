use tokio::sync::broadcast;

use crate::status::StatusMessage;

/// Default capacity of each subscriber's queue.
const DEFAULT_CAPACITY: usize = 256;

/// Event published on the status bus.
#[derive(Clone, Debug)]
pub enum BusEvent {
    /// A regular status message.
    Message(StatusMessage),
    /// A startup-phase message (the aggregate barrier report).
    Startup(StatusMessage),
}

impl BusEvent {
    pub fn message(&self) -> &StatusMessage {
        match self {
            Self::Message(m) | Self::Startup(m) => m,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Startup(_) => "startup",
        }
    }
}

/// Process-wide publish/subscribe channel for status messages.
///
/// Publication is fire-and-forget: there is no buffering for late
/// subscribers, and each subscriber has its own queue so a slow or
/// dropped subscriber never affects the publisher or its peers.
#[derive(Clone)]
pub struct StatusBus {
    tx: broadcast::Sender<BusEvent>,
}

impl StatusBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    /// Publish a status message. A message emitted with no subscribers
    /// attached is lost by design.
    pub fn emit(&self, message: StatusMessage) {
        if self.tx.send(BusEvent::Message(message)).is_err() {
            tracing::debug!("status message emitted with no subscribers");
        }
    }

    /// Publish a startup-phase message.
    pub fn emit_startup(&self, message: StatusMessage) {
        if self.tx.send(BusEvent::Startup(message)).is_err() {
            tracing::debug!("startup message emitted with no subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
