//! Orchestrator: start, resume, recover and stop runs.
//!
//! Each run gets one supervisory task driving its [`WorkflowMachine`] and one watcher task that
//! settles the run if the supervisor is aborted. The orchestrator itself holds no global state;
//! the run registry, stores and event sink are all injected.

use crate::agent::Agents;
use crate::concurrency::ConcurrencyGate;
use crate::control::{RunRegistry, StopController};
use crate::error::{PipelineError, StorageError};
use crate::pipeline::invoke::Invoker;
use crate::pipeline::machine::{PipelineSettings, WorkflowMachine};
use crate::pipeline::state::{Phase, RunStatus, WorkflowState};
use crate::retry::RetryPolicy;
use crate::store::{
    Checkpoint, CheckpointStore, MemoryCheckpointStore, MemoryRunStore, RunRecord, RunStore,
};
use crate::telemetry::{EventBus, EventLevel, EventSink, RunEvent};
use crate::types::RunId;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A request for a new run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub title: String,
    pub description: String,
    pub target: String,
    pub metadata: BTreeMap<String, String>,
}

impl RunRequest {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            target: target.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Handle to a run in flight. Dropping it does not cancel the run.
pub struct RunHandle {
    run_id: RunId,
    join: JoinHandle<Result<WorkflowState, PipelineError>>,
}

impl RunHandle {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Wait for the run to reach a terminal phase.
    pub async fn wait(self) -> Result<WorkflowState, PipelineError> {
        self.join
            .await
            .map_err(|err| PipelineError::SupervisorFailed(err.to_string()))?
    }
}

/// Result of startup recovery.
#[derive(Default)]
pub struct RecoveryReport {
    pub resumed: Vec<RunHandle>,
    pub failed: Vec<(RunId, String)>,
}

pub struct OrchestratorBuilder {
    agents: Agents,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    runs: Option<Arc<dyn RunStore>>,
    events: Option<Arc<dyn EventSink>>,
    registry: Option<Arc<RunRegistry>>,
    gate: Option<ConcurrencyGate>,
    retry: RetryPolicy,
    settings: PipelineSettings,
    stop_grace: Duration,
}

impl OrchestratorBuilder {
    pub fn checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn runs(mut self, store: Arc<dyn RunStore>) -> Self {
        self.runs = Some(store);
        self
    }

    pub fn events(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn registry(mut self, registry: Arc<RunRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn gate(mut self, gate: ConcurrencyGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn build(self) -> Orchestrator {
        let checkpoints = self
            .checkpoints
            .unwrap_or_else(|| Arc::new(MemoryCheckpointStore::new()));
        let runs = self.runs.unwrap_or_else(|| Arc::new(MemoryRunStore::new()));
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(EventBus::new(EventBus::DEFAULT_CAPACITY)));
        let registry = self.registry.unwrap_or_default();
        let invoker = Invoker::new(self.gate.unwrap_or_default(), self.retry);
        let machine = WorkflowMachine::new(
            self.agents,
            invoker,
            Arc::clone(&checkpoints),
            Arc::clone(&runs),
            Arc::clone(&events),
            self.settings,
        );
        Orchestrator {
            machine,
            stopper: StopController::new(Arc::clone(&registry), self.stop_grace),
            registry,
            checkpoints,
            runs,
            events,
        }
    }
}

pub struct Orchestrator {
    machine: WorkflowMachine,
    registry: Arc<RunRegistry>,
    stopper: StopController,
    checkpoints: Arc<dyn CheckpointStore>,
    runs: Arc<dyn RunStore>,
    events: Arc<dyn EventSink>,
}

impl Orchestrator {
    pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(2);

    pub fn builder(agents: Agents) -> OrchestratorBuilder {
        OrchestratorBuilder {
            agents,
            checkpoints: None,
            runs: None,
            events: None,
            registry: None,
            gate: None,
            retry: RetryPolicy::default(),
            settings: PipelineSettings::default(),
            stop_grace: Self::DEFAULT_STOP_GRACE,
        }
    }

    /// Create a run and start driving it. Must be called from within a tokio runtime.
    pub fn start(&self, request: RunRequest) -> Result<RunHandle, PipelineError> {
        let run_id = RunId::generate();
        let state = WorkflowState::new(
            run_id.clone(),
            request.title,
            request.description,
            request.target,
            request.metadata,
        );
        self.runs.put(&RunRecord::creating(&state))?;
        self.machine.checkpoint(&state);
        info!(run_id = %run_id, title = %state.title, "Run created");
        self.events.emit(RunEvent::new(
            run_id,
            "run_started",
            EventLevel::Info,
            format!("Starting {}", state.title),
            json!({ "title": state.title, "target": state.target }),
        ));
        Ok(self.spawn(state))
    }

    /// Re-enter a run at its checkpointed phase.
    ///
    /// A missing or unreadable checkpoint fails the run instead of restarting it. A run whose
    /// checkpoint is already terminal is returned as-is, with its record brought in line.
    pub fn resume(&self, run_id: &RunId) -> Result<RunHandle, PipelineError> {
        if self
            .registry
            .get(run_id)
            .map(|control| control.is_active())
            .unwrap_or(false)
        {
            return Err(PipelineError::RunAlreadyActive(run_id.clone()));
        }

        let checkpoint = match self.checkpoints.load(run_id) {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => {
                self.fail_unrecoverable(run_id, "No checkpoint to resume from")?;
                return Err(PipelineError::CheckpointMissing(run_id.clone()));
            }
            Err(StorageError::Corrupt { reason, .. }) => {
                self.fail_unrecoverable(run_id, &format!("Unusable checkpoint: {}", reason))?;
                return Err(PipelineError::CheckpointCorrupt {
                    run_id: run_id.clone(),
                    reason,
                });
            }
            Err(err) => return Err(err.into()),
        };

        let mut state = checkpoint.state;
        if state.phase.is_terminal() {
            info!(run_id = %run_id, phase = %state.phase, "Run already finished");
            let in_sync = matches!(
                self.runs.get(run_id),
                Ok(Some(record)) if record.status == state.status()
            );
            if !in_sync {
                self.machine.update_record(&state);
            }
            return Ok(RunHandle {
                run_id: run_id.clone(),
                join: tokio::spawn(async move { Ok(state) }),
            });
        }

        let reset = state.reset_interrupted_steps();
        info!(run_id = %run_id, phase = %state.phase, reset_steps = reset, "Resuming run");
        self.events.emit(RunEvent::new(
            run_id.clone(),
            "run_resumed",
            EventLevel::Info,
            format!("Resuming at {}", state.phase),
            json!({
                "phase": state.phase.as_str(),
                "cursor": state.cursor,
                "retry_count": state.retry_count,
                "checkpoint_written_at": checkpoint.written_at.to_rfc3339(),
            }),
        ));
        Ok(self.spawn(state))
    }

    /// Resume every run left `creating` or `running` by a previous process.
    ///
    /// Unreadable records are reported in [`RecoveryReport::failed`] without blocking the other
    /// runs. Checkpoints with no record are picked up as well.
    pub fn recover(&self) -> Result<RecoveryReport, PipelineError> {
        let mut report = RecoveryReport::default();
        let mut known = HashSet::new();
        for (run_id, entry) in self.runs.scan()? {
            known.insert(run_id.clone());
            match entry {
                Ok(record) if record.status.is_terminal() => {}
                Ok(_) => self.recover_one(&run_id, &mut report),
                Err(err) => {
                    warn!(run_id = %run_id, error = %err, "Unreadable run record");
                    report.failed.push((run_id, err.to_string()));
                }
            }
        }

        for run_id in self.checkpoints.list()? {
            if !known.contains(&run_id) {
                self.recover_one(&run_id, &mut report);
            }
        }

        info!(
            resumed = report.resumed.len(),
            failed = report.failed.len(),
            "Recovery complete"
        );
        Ok(report)
    }

    fn recover_one(&self, run_id: &RunId, report: &mut RecoveryReport) {
        if let Ok(Some(checkpoint)) = self.checkpoints.load(run_id) {
            if checkpoint.state.phase.is_terminal() {
                self.machine.update_record(&checkpoint.state);
                return;
            }
        }
        match self.resume(run_id) {
            Ok(handle) => report.resumed.push(handle),
            Err(PipelineError::RunAlreadyActive(_)) => {}
            Err(err) => {
                warn!(run_id = %run_id, error = %err, "Could not recover run");
                report.failed.push((run_id.clone(), err.to_string()));
            }
        }
    }

    /// Request cooperative stop, escalating to abort after the grace period.
    pub fn request_stop(&self, run_id: &RunId) -> bool {
        self.stopper.request_stop(run_id)
    }

    /// True once a stop was requested for the run in this process, or its record says `stopped`.
    pub fn is_stopped(&self, run_id: &RunId) -> bool {
        self.stopper.is_stopped(run_id)
            || matches!(
                self.runs.get(run_id),
                Ok(Some(record)) if record.status == RunStatus::Stopped
            )
    }

    pub fn status(&self, run_id: &RunId) -> Result<RunRecord, PipelineError> {
        self.runs
            .get(run_id)?
            .ok_or_else(|| PipelineError::RunNotFound(run_id.clone()))
    }

    pub fn list(&self) -> Result<Vec<RunRecord>, PipelineError> {
        Ok(self.runs.list()?)
    }

    pub fn checkpoint(&self, run_id: &RunId) -> Result<Option<Checkpoint>, PipelineError> {
        Ok(self.checkpoints.load(run_id)?)
    }

    pub fn active_runs(&self) -> Vec<RunId> {
        self.registry.active_runs()
    }

    fn spawn(&self, state: WorkflowState) -> RunHandle {
        let run_id = state.run_id.clone();
        let control = self.registry.control(&run_id);

        let machine = self.machine.clone();
        let supervisor_control = control.clone();
        let supervisor =
            tokio::spawn(async move { machine.drive(state, &supervisor_control).await });
        control.attach(supervisor.abort_handle());

        let machine = self.machine.clone();
        let checkpoints = Arc::clone(&self.checkpoints);
        let registry = Arc::clone(&self.registry);
        let watched_id = run_id.clone();
        let join = tokio::spawn(async move {
            let outcome = supervisor.await;
            registry.release(&watched_id);
            match outcome {
                Ok(state) => Ok(state),
                Err(join_err) => {
                    let (phase, reason) = if join_err.is_cancelled() {
                        (Phase::Stopped, None)
                    } else {
                        error!(run_id = %watched_id, error = %join_err, "Run supervisor panicked");
                        (Phase::Failed, Some(format!("Supervisor panicked: {}", join_err)))
                    };
                    settle_aborted(&machine, checkpoints.as_ref(), &watched_id, phase, reason)
                }
            }
        });

        RunHandle { run_id, join }
    }

    fn fail_unrecoverable(&self, run_id: &RunId, reason: &str) -> Result<(), PipelineError> {
        let Some(mut record) = self.runs.get(run_id)? else {
            return Err(PipelineError::RunNotFound(run_id.clone()));
        };
        error!(run_id = %run_id, reason, "Run cannot be resumed");
        record.mark_failed(reason);
        self.runs.put(&record)?;
        self.events.emit(RunEvent::new(
            run_id.clone(),
            "run_finished",
            EventLevel::Error,
            format!("Run failed: {}", reason),
            json!({ "status": RunStatus::Failed.as_str(), "error": reason }),
        ));
        Ok(())
    }
}

/// Bring the last checkpoint of an aborted supervisor to a terminal phase.
fn settle_aborted(
    machine: &WorkflowMachine,
    checkpoints: &dyn CheckpointStore,
    run_id: &RunId,
    phase: Phase,
    reason: Option<String>,
) -> Result<WorkflowState, PipelineError> {
    let mut state = match checkpoints.load(run_id) {
        Ok(Some(checkpoint)) => checkpoint.state,
        Ok(None) => return Err(PipelineError::CheckpointMissing(run_id.clone())),
        Err(err) => {
            return Err(PipelineError::CheckpointCorrupt {
                run_id: run_id.clone(),
                reason: err.to_string(),
            })
        }
    };
    if state.phase.is_terminal() {
        return Ok(state);
    }

    let from = state.phase;
    state.phase = phase;
    if reason.is_some() {
        state.error = reason;
    }
    state.reset_interrupted_steps();
    info!(run_id = %run_id, from = %from, to = %phase, "Settled aborted run");
    machine.emit(
        &state,
        "phase_changed",
        EventLevel::Warning,
        format!("{} -> {}", from, phase),
        json!({ "from": from.as_str(), "to": phase.as_str(), "forced": true }),
    );
    machine.emit_finished(&state);
    machine.checkpoint(&state);
    machine.update_record(&state);
    Ok(state)
}
