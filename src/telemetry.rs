//! Telemetry domain: run events, live fan-out, ingestion, and durable event storage.
//!
//! Emission is fire-and-forget. Nothing in this module can block or fail a run.

pub mod bus;
pub mod events;
pub mod ingestor;
pub mod store;

pub use bus::EventBus;
pub use events::{EventLevel, PhaseChangedData, RecordedEvent, RunEvent, StepEventData};
pub use ingestor::EventIngestor;
pub use store::EventStore;

/// Receiver of structured progress notifications.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RunEvent);
}
