//! In-memory stores for tests and ephemeral runs.

use crate::error::StorageError;
use crate::store::{Checkpoint, CheckpointStore, RunRecord, RunStore};
use crate::types::RunId;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Keeps encoded checkpoints so decoding behaves exactly like the durable store.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<RunId, Vec<u8>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_raw(&self, run_id: &RunId, raw: Vec<u8>) {
        self.checkpoints.write().insert(run_id.clone(), raw);
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        let raw = checkpoint.encode()?;
        self.checkpoints
            .write()
            .insert(checkpoint.run_id.clone(), raw);
        Ok(())
    }

    fn load(&self, run_id: &RunId) -> Result<Option<Checkpoint>, StorageError> {
        let guard = self.checkpoints.read();
        match guard.get(run_id) {
            Some(raw) => Checkpoint::decode(run_id, raw).map(Some),
            None => Ok(None),
        }
    }

    fn list(&self) -> Result<Vec<RunId>, StorageError> {
        let mut ids: Vec<RunId> = self.checkpoints.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[derive(Debug, Default)]
pub struct MemoryRunStore {
    records: RwLock<HashMap<RunId, RunRecord>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStore for MemoryRunStore {
    fn put(&self, record: &RunRecord) -> Result<(), StorageError> {
        self.records
            .write()
            .insert(record.run_id.clone(), record.clone());
        Ok(())
    }

    fn get(&self, run_id: &RunId) -> Result<Option<RunRecord>, StorageError> {
        Ok(self.records.read().get(run_id).cloned())
    }

    fn list(&self) -> Result<Vec<RunRecord>, StorageError> {
        let mut out: Vec<RunRecord> = self.records.read().values().cloned().collect();
        out.sort_by_key(|r| std::cmp::Reverse(r.created_at));
        Ok(out)
    }
}
