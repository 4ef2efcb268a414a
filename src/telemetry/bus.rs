//! In-process event bus: live broadcast plus an optional persistence queue.

use crate::telemetry::events::RunEvent;
use crate::telemetry::EventSink;
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

#[derive(Clone)]
pub struct EventBus {
    live: broadcast::Sender<RunEvent>,
    queue: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl EventBus {
    pub const DEFAULT_CAPACITY: usize = 256;

    /// Live fan-out only.
    pub fn new(capacity: usize) -> Self {
        let (live, _) = broadcast::channel(capacity.max(1));
        Self { live, queue: None }
    }

    /// Live fan-out plus a queue to be drained by an [`crate::telemetry::EventIngestor`].
    pub fn with_persistence(capacity: usize) -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (live, _) = broadcast::channel(capacity.max(1));
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                live,
                queue: Some(sender),
            },
            receiver,
        )
    }

    /// Subscribe to live events. Subscribers that fall behind lose the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.live.subscribe()
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: RunEvent) {
        if let Some(queue) = &self.queue {
            if queue.send(event.clone()).is_err() {
                trace!(run_id = %event.run_id, kind = %event.kind, "event queue closed");
            }
        }
        // No live subscriber is not an error.
        let _ = self.live.send(event);
    }
}
