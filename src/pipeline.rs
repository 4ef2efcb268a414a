//! Pipeline domain: plans, grouping, guarded calls, the workflow machine, and the orchestrator.

pub mod executor;
pub mod grouping;
pub mod invoke;
pub mod machine;
pub mod orchestrator;
pub mod plan;
pub mod state;

pub use grouping::{group_steps, remaining_groups, PendingGroup, StepGroup};
pub use invoke::Invoker;
pub use machine::{PhaseTimeouts, PipelineSettings, WorkflowMachine};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, RecoveryReport, RunHandle, RunRequest};
pub use plan::{Plan, Step, StepRole};
pub use state::{Phase, RunStatus, StepStatus, WorkflowState};
