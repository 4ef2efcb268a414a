//! Workflow state: the single mutable value owned by a run's supervisory task.

use crate::agent::{Artifact, ResearchResult, RunContext, TestReport};
use crate::error::PipelineError;
use crate::pipeline::plan::Plan;
use crate::types::{RunId, StepId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Node of the workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Researching,
    Generating,
    Testing,
    Correcting,
    Done,
    Failed,
    Stopped,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Researching => "researching",
            Phase::Generating => "generating",
            Phase::Testing => "testing",
            Phase::Correcting => "correcting",
            Phase::Done => "done",
            Phase::Failed => "failed",
            Phase::Stopped => "stopped",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Failed | Phase::Stopped)
    }

    /// Whether the graph has an edge from `self` to `next`.
    pub fn can_transition_to(self, next: Phase) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Phase::Failed | Phase::Stopped) {
            return true;
        }
        matches!(
            (self, next),
            (Phase::Planning, Phase::Researching)
                | (Phase::Planning, Phase::Generating)
                | (Phase::Researching, Phase::Generating)
                | (Phase::Generating, Phase::Testing)
                | (Phase::Testing, Phase::Correcting)
                | (Phase::Testing, Phase::Done)
                | (Phase::Correcting, Phase::Testing)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run status exposed to external status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Creating,
    Running,
    Stopped,
    Failed,
    Done,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Creating => "creating",
            RunStatus::Running => "running",
            RunStatus::Stopped => "stopped",
            RunStatus::Failed => "failed",
            RunStatus::Done => "done",
        }
    }

    pub fn from_phase(phase: Phase) -> Self {
        match phase {
            Phase::Done => RunStatus::Done,
            Phase::Failed => RunStatus::Failed,
            Phase::Stopped => RunStatus::Stopped,
            _ => RunStatus::Running,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Stopped | RunStatus::Failed | RunStatus::Done)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-step progress as shown to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Done,
    Failed,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Done => "done",
            StepStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub run_id: RunId,
    pub title: String,
    pub description: String,
    pub target: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub phase: Phase,
    #[serde(default)]
    pub plan: Plan,
    /// Number of plan steps covered by fully completed groups.
    #[serde(default)]
    pub cursor: usize,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub test_results: Option<TestReport>,
    #[serde(default)]
    pub research: Option<ResearchResult>,
    /// Keyed by artifact path so re-executed steps overwrite their entries.
    #[serde(default)]
    pub artifacts: BTreeMap<String, Artifact>,
    #[serde(default)]
    pub step_status: BTreeMap<StepId, StepStatus>,
    #[serde(default)]
    pub completed_with_warnings: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl WorkflowState {
    pub fn new(
        run_id: RunId,
        title: impl Into<String>,
        description: impl Into<String>,
        target: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            run_id,
            title: title.into(),
            description: description.into(),
            target: target.into(),
            metadata,
            phase: Phase::Planning,
            plan: Plan::default(),
            cursor: 0,
            retry_count: 0,
            test_results: None,
            research: None,
            artifacts: BTreeMap::new(),
            step_status: BTreeMap::new(),
            completed_with_warnings: false,
            error: None,
        }
    }

    /// Move to `next` along a graph edge.
    pub fn transition(&mut self, next: Phase) -> Result<(), PipelineError> {
        if !self.phase.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    pub fn status(&self) -> RunStatus {
        RunStatus::from_phase(self.phase)
    }

    pub fn context(&self) -> RunContext {
        RunContext {
            run_id: self.run_id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            target: self.target.clone(),
            metadata: self.metadata.clone(),
            plan: self.plan.clone(),
            research: self.research.clone(),
        }
    }

    pub fn step_status(&self, step_id: &StepId) -> StepStatus {
        self.step_status.get(step_id).copied().unwrap_or_default()
    }

    pub fn set_step_status(&mut self, step_id: &StepId, status: StepStatus) {
        self.step_status.insert(step_id.clone(), status);
    }

    /// Reset steps left `running` by an interrupted process; their group re-executes on resume.
    pub fn reset_interrupted_steps(&mut self) -> usize {
        let mut reset = 0usize;
        for status in self.step_status.values_mut() {
            if *status == StepStatus::Running {
                *status = StepStatus::Pending;
                reset += 1;
            }
        }
        reset
    }

    pub fn record_artifacts(&mut self, artifacts: Vec<Artifact>) {
        for artifact in artifacts {
            self.artifacts.insert(artifact.path.clone(), artifact);
        }
    }
}

/// Where a run goes after testing.
///
/// Passing goes to `done`. Failing goes to `correcting` while the correction budget lasts, and
/// to a degraded `done` once it is spent.
pub fn route_after_test(report: &TestReport, retry_count: u32, max_retries: u32) -> Phase {
    if report.passed || retry_count >= max_retries {
        Phase::Done
    } else {
        Phase::Correcting
    }
}

/// Entry phase after planning.
pub fn route_after_plan(research_enabled: bool) -> Phase {
    if research_enabled {
        Phase::Researching
    } else {
        Phase::Generating
    }
}
