//! Durable sled-backed run event store.

use std::io;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};

use crate::error::StorageError;
use crate::telemetry::events::RecordedEvent;
use crate::types::RunId;

const TREE_EVENTS: &str = "events";
const TREE_META: &str = "event_meta";
const EVENT_KEY_PAD: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMeta {
    pub next_seq: u64,
    pub updated_at: DateTime<Utc>,
}

impl Default for EventMeta {
    fn default() -> Self {
        Self {
            next_seq: 1,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct EventStore {
    db: Db,
    events: Tree,
    meta: Tree,
}

impl EventStore {
    pub fn new(db: Db) -> Result<Self, StorageError> {
        let events = db.open_tree(TREE_EVENTS).map_err(to_storage_io)?;
        let meta = db.open_tree(TREE_META).map_err(to_storage_io)?;
        Ok(Self { db, events, meta })
    }

    pub fn shared(db: Db) -> Result<Arc<Self>, StorageError> {
        Ok(Arc::new(Self::new(db)?))
    }

    pub fn get_meta(&self, run_id: &RunId) -> Result<Option<EventMeta>, StorageError> {
        let Some(raw) = self
            .meta
            .get(run_id.as_str().as_bytes())
            .map_err(to_storage_io)?
        else {
            return Ok(None);
        };
        let parsed = serde_json::from_slice(&raw).map_err(to_storage_data)?;
        Ok(Some(parsed))
    }

    pub fn put_meta(&self, run_id: &RunId, meta: &EventMeta) -> Result<(), StorageError> {
        let value = serde_json::to_vec(meta).map_err(to_storage_data)?;
        self.meta
            .insert(run_id.as_str().as_bytes(), value)
            .map_err(to_storage_io)?;
        Ok(())
    }

    pub fn append_event(&self, event: &RecordedEvent) -> Result<(), StorageError> {
        let key = encode_event_key(&event.event.run_id, event.seq);
        let value = serde_json::to_vec(event).map_err(to_storage_data)?;
        self.events
            .insert(key.as_bytes(), value)
            .map_err(to_storage_io)?;
        Ok(())
    }

    pub fn read_events(&self, run_id: &RunId) -> Result<Vec<RecordedEvent>, StorageError> {
        self.read_events_after(run_id, 0)
    }

    pub fn read_events_after(
        &self,
        run_id: &RunId,
        after_seq: u64,
    ) -> Result<Vec<RecordedEvent>, StorageError> {
        let prefix = format!("{}:", run_id);
        let mut out = Vec::new();
        for result in self.events.scan_prefix(prefix.as_bytes()) {
            let (_, value) = result.map_err(to_storage_io)?;
            let parsed: RecordedEvent = serde_json::from_slice(&value).map_err(to_storage_data)?;
            if parsed.seq > after_seq {
                out.push(parsed);
            }
        }
        out.sort_by_key(|e| e.seq);
        Ok(out)
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(to_storage_io)?;
        Ok(())
    }

    pub fn encode_event_key(run_id: &RunId, seq: u64) -> String {
        encode_event_key(run_id, seq)
    }
}

fn encode_event_key(run_id: &RunId, seq: u64) -> String {
    format!("{}:{seq:0EVENT_KEY_PAD$}", run_id)
}

fn to_storage_io(err: sled::Error) -> StorageError {
    StorageError::IoError(io::Error::new(io::ErrorKind::Other, err.to_string()))
}

fn to_storage_data(err: serde_json::Error) -> StorageError {
    StorageError::IoError(io::Error::new(io::ErrorKind::InvalidData, err.to_string()))
}
