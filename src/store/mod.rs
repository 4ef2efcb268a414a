//! Checkpoint and Run Record Store
//!
//! Durable snapshots of workflow state keyed by run id, plus the externally visible run
//! records. Checkpoints are written after every phase transition and never deleted; a run id is
//! never reused.

pub mod memory;
pub mod persistence;

pub use memory::{MemoryCheckpointStore, MemoryRunStore};
pub use persistence::SledStore;

use crate::error::StorageError;
use crate::pipeline::state::{Phase, RunStatus, StepStatus, WorkflowState};
use crate::types::{RunId, StepId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Format version written into every checkpoint. Older or newer versions are rejected on load.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Versioned snapshot of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub run_id: RunId,
    pub state: WorkflowState,
    pub written_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(state: &WorkflowState) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            run_id: state.run_id.clone(),
            state: state.clone(),
            written_at: Utc::now(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, StorageError> {
        serde_json::to_vec(self).map_err(|e| StorageError::Corrupt {
            key: self.run_id.to_string(),
            reason: format!("Failed to serialize checkpoint: {}", e),
        })
    }

    /// Decode and check the format version.
    pub fn decode(run_id: &RunId, raw: &[u8]) -> Result<Self, StorageError> {
        let checkpoint: Checkpoint =
            serde_json::from_slice(raw).map_err(|e| StorageError::Corrupt {
                key: run_id.to_string(),
                reason: format!("Failed to deserialize checkpoint: {}", e),
            })?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(StorageError::Corrupt {
                key: run_id.to_string(),
                reason: format!(
                    "Unsupported checkpoint version {} (expected {})",
                    checkpoint.version, CHECKPOINT_VERSION
                ),
            });
        }
        if &checkpoint.run_id != run_id {
            return Err(StorageError::Corrupt {
                key: run_id.to_string(),
                reason: format!("Checkpoint belongs to run {}", checkpoint.run_id),
            });
        }
        Ok(checkpoint)
    }
}

/// Checkpoint store interface. Saves are last-write-wins.
pub trait CheckpointStore: Send + Sync {
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), StorageError>;
    fn load(&self, run_id: &RunId) -> Result<Option<Checkpoint>, StorageError>;
    fn list(&self) -> Result<Vec<RunId>, StorageError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepProgress {
    pub id: StepId,
    pub name: String,
    pub status: StepStatus,
}

/// Externally visible summary of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub title: String,
    pub status: RunStatus,
    pub phase: Phase,
    #[serde(default)]
    pub steps: Vec<StepProgress>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub completed_with_warnings: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    /// Record for a run whose supervisor has not started yet.
    pub fn creating(state: &WorkflowState) -> Self {
        let now = Utc::now();
        let mut record = Self::from_state(state, now);
        record.status = RunStatus::Creating;
        record
    }

    pub fn from_state(state: &WorkflowState, created_at: DateTime<Utc>) -> Self {
        let steps = state
            .plan
            .steps()
            .iter()
            .map(|step| StepProgress {
                id: step.id.clone(),
                name: step.name.clone(),
                status: state.step_status(&step.id),
            })
            .collect();
        Self {
            run_id: state.run_id.clone(),
            title: state.title.clone(),
            status: state.status(),
            phase: state.phase,
            steps,
            retry_count: state.retry_count,
            completed_with_warnings: state.completed_with_warnings,
            error: state.error.clone(),
            created_at,
            updated_at: Utc::now(),
        }
    }

    /// Mark the run failed without a usable state, e.g. when its checkpoint cannot be read.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.phase = Phase::Failed;
        self.error = Some(reason.into());
        self.updated_at = Utc::now();
    }
}

/// Run record store interface
pub trait RunStore: Send + Sync {
    fn put(&self, record: &RunRecord) -> Result<(), StorageError>;
    fn get(&self, run_id: &RunId) -> Result<Option<RunRecord>, StorageError>;
    /// All readable records, most recently created first.
    fn list(&self) -> Result<Vec<RunRecord>, StorageError>;

    /// Every stored record keyed by run id, decoded one at a time so a damaged entry is reported
    /// on its own instead of hiding the rest.
    fn scan(&self) -> Result<Vec<(RunId, Result<RunRecord, StorageError>)>, StorageError> {
        Ok(self
            .list()?
            .into_iter()
            .map(|record| (record.run_id.clone(), Ok(record)))
            .collect())
    }
}
