//! Instance-scoped lifecycle event bus.
//!
//! Components subscribe to stop/reset broadcasts instead of reaching for a
//! global singleton; the server constructs one bus and hands it around.

use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Started { ports: Vec<u16> },
    Stop,
    Reset,
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    /// Broadcast to all current subscribers; lagging or absent subscribers
    /// are not an error.
    pub fn publish(&self, event: ServerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
