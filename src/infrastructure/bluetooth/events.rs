//! Event publication
//!
//! Transport events fan out to every subscriber over unbounded channels.
//! Emission never blocks, so events leave in exactly the order they happen.
//! User-facing messages go to a [`StatusSink`].

use std::cell::RefCell;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::domain::models::{MessageSeverity, StatusMessage, TransportEvent};

#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: RefCell<Vec<mpsc::UnboundedSender<TransportEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.borrow_mut().push(tx);
        rx
    }

    pub fn emit(&self, event: TransportEvent) {
        self.subscribers
            .borrow_mut()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }
}

/// Localized, user-visible log sink.
pub trait StatusSink {
    fn post(&self, message: StatusMessage);
}

impl StatusSink for mpsc::UnboundedSender<StatusMessage> {
    fn post(&self, message: StatusMessage) {
        let _ = self.send(message);
    }
}

/// Writes status messages to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn post(&self, message: StatusMessage) {
        let params = message.params.join(", ");
        match message.severity {
            MessageSeverity::Info => info!(key = message.key, "{}", params),
            MessageSeverity::Error => error!(key = message.key, "{}", params),
        }
    }
}
