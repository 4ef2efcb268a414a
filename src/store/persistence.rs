//! Sled-backed persistence for checkpoints and run records.

use crate::error::StorageError;
use crate::store::{Checkpoint, CheckpointStore, RunRecord, RunStore};
use crate::types::RunId;
use sled::{Db, Tree};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

const TREE_CHECKPOINTS: &str = "checkpoints";
const TREE_RUNS: &str = "runs";

/// One sled database, one tree per concern.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
    checkpoints: Tree,
    runs: Tree,
}

impl SledStore {
    /// Open (or create) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| {
            StorageError::IoError(io::Error::new(
                io::ErrorKind::Other,
                format!("Failed to open sled database: {}", e),
            ))
        })?;
        Self::new(db)
    }

    pub fn new(db: Db) -> Result<Self, StorageError> {
        let checkpoints = db.open_tree(TREE_CHECKPOINTS).map_err(to_storage_io)?;
        let runs = db.open_tree(TREE_RUNS).map_err(to_storage_io)?;
        Ok(Self {
            db,
            checkpoints,
            runs,
        })
    }

    pub fn shared(db: Db) -> Result<Arc<Self>, StorageError> {
        Ok(Arc::new(Self::new(db)?))
    }

    /// Underlying database, shared with the event store.
    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Write raw run record bytes, bypassing encoding.
    pub fn put_raw_record(&self, run_id: &RunId, raw: &[u8]) -> Result<(), StorageError> {
        self.runs
            .insert(run_id.as_str().as_bytes(), raw)
            .map_err(to_storage_io)?;
        Ok(())
    }

    /// Write raw checkpoint bytes, bypassing encoding.
    pub fn put_raw_checkpoint(&self, run_id: &RunId, raw: &[u8]) -> Result<(), StorageError> {
        self.checkpoints
            .insert(run_id.as_str().as_bytes(), raw)
            .map_err(to_storage_io)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(to_storage_io)?;
        Ok(())
    }
}

impl CheckpointStore for SledStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        let value = checkpoint.encode()?;
        self.checkpoints
            .insert(checkpoint.run_id.as_str().as_bytes(), value)
            .map_err(to_storage_io)?;
        self.checkpoints.flush().map_err(to_storage_io)?;
        Ok(())
    }

    fn load(&self, run_id: &RunId) -> Result<Option<Checkpoint>, StorageError> {
        let Some(raw) = self
            .checkpoints
            .get(run_id.as_str().as_bytes())
            .map_err(to_storage_io)?
        else {
            return Ok(None);
        };
        Checkpoint::decode(run_id, &raw).map(Some)
    }

    fn list(&self) -> Result<Vec<RunId>, StorageError> {
        let mut out = Vec::new();
        for result in self.checkpoints.iter() {
            let (key, _) = result.map_err(to_storage_io)?;
            out.push(RunId::from(String::from_utf8_lossy(&key).into_owned()));
        }
        Ok(out)
    }
}

impl RunStore for SledStore {
    fn put(&self, record: &RunRecord) -> Result<(), StorageError> {
        let value = serde_json::to_vec(record).map_err(to_storage_data)?;
        self.runs
            .insert(record.run_id.as_str().as_bytes(), value)
            .map_err(to_storage_io)?;
        Ok(())
    }

    fn get(&self, run_id: &RunId) -> Result<Option<RunRecord>, StorageError> {
        let Some(raw) = self
            .runs
            .get(run_id.as_str().as_bytes())
            .map_err(to_storage_io)?
        else {
            return Ok(None);
        };
        let parsed = serde_json::from_slice(&raw).map_err(to_storage_data)?;
        Ok(Some(parsed))
    }

    fn list(&self) -> Result<Vec<RunRecord>, StorageError> {
        let mut out = Vec::new();
        for (run_id, entry) in self.scan()? {
            match entry {
                Ok(record) => out.push(record),
                Err(err) => warn!(run_id = %run_id, error = %err, "Skipping unreadable run record"),
            }
        }
        out.sort_by_key(|r| std::cmp::Reverse(r.created_at));
        Ok(out)
    }

    fn scan(&self) -> Result<Vec<(RunId, Result<RunRecord, StorageError>)>, StorageError> {
        let mut out = Vec::new();
        for result in self.runs.iter() {
            let (key, value) = result.map_err(to_storage_io)?;
            let run_id = RunId::from(String::from_utf8_lossy(&key).into_owned());
            let record = serde_json::from_slice::<RunRecord>(&value).map_err(|e| {
                StorageError::Corrupt {
                    key: run_id.to_string(),
                    reason: format!("Failed to deserialize run record: {}", e),
                }
            });
            out.push((run_id, record));
        }
        Ok(out)
    }
}

fn to_storage_io(err: sled::Error) -> StorageError {
    StorageError::IoError(io::Error::new(io::ErrorKind::Other, err.to_string()))
}

fn to_storage_data(err: serde_json::Error) -> StorageError {
    StorageError::IoError(io::Error::new(io::ErrorKind::InvalidData, err.to_string()))
}
