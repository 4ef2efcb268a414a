//! Event ingestion and sequence assignment.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::warn;

use crate::error::StorageError;
use crate::telemetry::events::{RecordedEvent, RunEvent};
use crate::telemetry::store::EventStore;

/// Drains the bus persistence queue into the event store, assigning per-run sequence numbers.
pub struct EventIngestor {
    store: Arc<EventStore>,
    receiver: UnboundedReceiver<RunEvent>,
}

impl EventIngestor {
    pub fn new(store: Arc<EventStore>, receiver: UnboundedReceiver<RunEvent>) -> Self {
        Self { store, receiver }
    }

    pub fn ingest_pending(&mut self) -> Result<usize, StorageError> {
        let mut count = 0usize;
        while let Ok(event) = self.receiver.try_recv() {
            self.ingest_one(event)?;
            count += 1;
        }
        Ok(count)
    }

    /// Persist events until every bus handle has been dropped.
    pub async fn run(mut self) {
        while let Some(event) = self.receiver.recv().await {
            let run_id = event.run_id.clone();
            let kind = event.kind.clone();
            if let Err(err) = self.ingest_one(event) {
                warn!(
                    run_id = %run_id,
                    event_type = %kind,
                    error = %err,
                    "failed to persist run event"
                );
            }
        }
        if let Err(err) = self.store.flush() {
            warn!(error = %err, "failed to flush event store");
        }
    }

    fn ingest_one(&self, event: RunEvent) -> Result<(), StorageError> {
        let mut meta = self.store.get_meta(&event.run_id)?.unwrap_or_default();

        let seq = meta.next_seq;
        let run_id = event.run_id.clone();
        let recorded = RecordedEvent::from_event(event, seq);
        self.store.append_event(&recorded)?;
        meta.next_seq += 1;
        meta.updated_at = Utc::now();
        self.store.put_meta(&run_id, &meta)?;
        Ok(())
    }
}
