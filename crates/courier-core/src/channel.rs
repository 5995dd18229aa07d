use tokio::sync::broadcast;

use crate::types::TransportEvent;

/// Broadcast event stream type used by UI subscribers.
pub type EventStream = broadcast::Receiver<TransportEvent>;

/// Event fan-out shared by the poll loop, the send pipeline and the tracker
/// bridge.
#[derive(Clone, Debug)]
pub struct TransportChannels {
    event_tx: broadcast::Sender<TransportEvent>,
}

impl TransportChannels {
    pub fn new(event_buffer: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));
        Self { event_tx }
    }

    /// Clone the event sender.
    pub fn event_sender(&self) -> broadcast::Sender<TransportEvent> {
        self.event_tx.clone()
    }

    /// Subscribe to emitted transport events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl Default for TransportChannels {
    fn default() -> Self {
        Self::new(512)
    }
}
