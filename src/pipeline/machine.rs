//! Workflow machine: the per-run supervisory driver.
//!
//! `plan -> [research] -> generate -> test -> [correct <-> test] -> done`. The machine is the
//! only writer of a run's [`WorkflowState`]. Every transition is announced on the event sink,
//! checkpointed, and mirrored into the run record; those writes are best-effort and never end a
//! run on their own.

use crate::agent::{Agents, ResearchResult};
use crate::control::RunControl;
use crate::error::PipelineError;
use crate::pipeline::executor::GroupExecutor;
use crate::pipeline::grouping::remaining_groups;
use crate::pipeline::invoke::Invoker;
use crate::pipeline::state::{
    route_after_plan, route_after_test, Phase, StepStatus, WorkflowState,
};
use crate::retry::RetryPolicy;
use crate::store::{Checkpoint, CheckpointStore, RunRecord, RunStore};
use crate::telemetry::{EventLevel, EventSink, PhaseChangedData, RunEvent};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Wall-clock budget for each kind of collaborator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimeouts {
    pub plan: Duration,
    pub research: Duration,
    pub generate: Duration,
    pub test: Duration,
    pub correct: Duration,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            plan: Duration::from_secs(180),
            research: Duration::from_secs(15),
            generate: Duration::from_secs(120),
            test: Duration::from_secs(120),
            correct: Duration::from_secs(180),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub max_retries: u32,
    pub enable_research: bool,
    pub timeouts: PhaseTimeouts,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            enable_research: true,
            timeouts: PhaseTimeouts::default(),
        }
    }
}

#[derive(Clone)]
pub struct WorkflowMachine {
    agents: Agents,
    invoker: Invoker,
    checkpoints: Arc<dyn CheckpointStore>,
    runs: Arc<dyn RunStore>,
    events: Arc<dyn EventSink>,
    settings: PipelineSettings,
}

impl WorkflowMachine {
    pub fn new(
        agents: Agents,
        invoker: Invoker,
        checkpoints: Arc<dyn CheckpointStore>,
        runs: Arc<dyn RunStore>,
        events: Arc<dyn EventSink>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            agents,
            invoker,
            checkpoints,
            runs,
            events,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Drive `state` until it reaches a terminal phase.
    pub async fn drive(&self, mut state: WorkflowState, control: &RunControl) -> WorkflowState {
        info!(run_id = %state.run_id, phase = %state.phase, "Driving workflow");
        self.update_record(&state);

        while !state.phase.is_terminal() {
            if control.is_stopped() {
                self.advance(&mut state, Phase::Stopped);
                break;
            }

            let outcome = match state.phase {
                Phase::Planning => self.plan(&mut state, control).await,
                Phase::Researching => self.research(&mut state, control).await,
                Phase::Generating => self.generate(&mut state, control).await,
                Phase::Testing => self.test(&mut state, control).await,
                Phase::Correcting => self.correct(&mut state, control).await,
                Phase::Done | Phase::Failed | Phase::Stopped => break,
            };

            match outcome {
                Ok(next) => self.advance(&mut state, next),
                Err(err) if err.is_cancelled() || control.is_stopped() => {
                    self.advance(&mut state, Phase::Stopped)
                }
                Err(err) => {
                    warn!(run_id = %state.run_id, phase = %state.phase, error = %err, "Phase failed");
                    state.error = Some(err.to_string());
                    self.advance(&mut state, Phase::Failed);
                }
            }
        }
        state
    }

    async fn plan(
        &self,
        state: &mut WorkflowState,
        control: &RunControl,
    ) -> Result<Phase, PipelineError> {
        self.emit_agent(state, "planner", EventLevel::Info, "Planning project", json!({}));
        let ctx = state.context();
        let planner = &self.agents.planner;
        let plan = self
            .invoker
            .call("plan", self.settings.timeouts.plan, control.signal(), || {
                planner.plan(&ctx)
            })
            .await
            .map_err(|err| match err {
                PipelineError::Cancelled | PipelineError::InvalidPlan(_) => err,
                other => PipelineError::PlanFailed(other.to_string()),
            })?;

        if plan.is_empty() {
            return Err(PipelineError::InvalidPlan(
                "Planner returned no steps".to_string(),
            ));
        }
        plan.validate()?;

        state.step_status.clear();
        for step in plan.steps() {
            state.set_step_status(&step.id, StepStatus::Pending);
        }
        state.cursor = 0;
        state.plan = plan;

        let groups = remaining_groups(&state.plan, 0).len();
        self.emit_agent(
            state,
            "planner",
            EventLevel::Info,
            format!("Plan created with {} steps in {} groups", state.plan.len(), groups),
            json!({ "step_count": state.plan.len(), "group_count": groups }),
        );
        Ok(route_after_plan(self.settings.enable_research))
    }

    async fn research(
        &self,
        state: &mut WorkflowState,
        control: &RunControl,
    ) -> Result<Phase, PipelineError> {
        let query = research_query(state);
        let Some(researcher) = &self.agents.researcher else {
            debug!(run_id = %state.run_id, "No researcher configured");
            state.research = Some(ResearchResult::empty(query, None));
            return Ok(Phase::Generating);
        };

        self.emit_agent(
            state,
            "researcher",
            EventLevel::Info,
            format!("Research: {}", query),
            json!({ "query": query }),
        );
        let ctx = state.context();
        let once = Invoker::new(self.invoker.gate().clone(), RetryPolicy::no_retry());
        let result = once
            .call(
                "research",
                self.settings.timeouts.research,
                control.signal(),
                || researcher.research(&ctx),
            )
            .await;

        let research = match result {
            Ok(research) => {
                self.emit_agent(
                    state,
                    "researcher",
                    EventLevel::Info,
                    format!("Research returned {} results", research.results.len()),
                    json!({ "result_count": research.results.len() }),
                );
                research
            }
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => {
                warn!(run_id = %state.run_id, error = %err, "Research failed, continuing without results");
                self.emit_agent(
                    state,
                    "researcher",
                    EventLevel::Warning,
                    "Research failed, continuing without results",
                    json!({ "error": err.to_string() }),
                );
                ResearchResult::empty(query, Some(err.to_string()))
            }
        };
        state.research = Some(research);
        Ok(Phase::Generating)
    }

    async fn generate(
        &self,
        state: &mut WorkflowState,
        control: &RunControl,
    ) -> Result<Phase, PipelineError> {
        let executor = GroupExecutor::new(
            Arc::clone(&self.agents.generator),
            self.invoker.clone(),
            Arc::clone(&self.events),
            self.settings.timeouts.generate,
        );

        for pending in remaining_groups(&state.plan, state.cursor) {
            if control.is_stopped() {
                return Err(PipelineError::Cancelled);
            }

            for step in &pending.group.steps {
                state.set_step_status(&step.id, StepStatus::Running);
            }
            self.update_record(state);

            let ctx = state.context();
            let report = executor.run_group(&pending, &ctx, control.signal()).await;

            let failure = report
                .first_failure()
                .map(|(step_id, err)| PipelineError::StepFailed {
                    step_id: step_id.clone(),
                    message: err.to_string(),
                });
            let mut cancelled = false;
            for outcome in report.outcomes {
                match outcome.result {
                    Ok(artifacts) => {
                        state.set_step_status(&outcome.step_id, StepStatus::Done);
                        state.record_artifacts(artifacts);
                    }
                    Err(PipelineError::Cancelled) => {
                        cancelled = true;
                        state.set_step_status(&outcome.step_id, StepStatus::Pending);
                    }
                    Err(_) => state.set_step_status(&outcome.step_id, StepStatus::Failed),
                }
            }

            if let Some(err) = failure {
                self.update_record(state);
                return Err(err);
            }
            if cancelled {
                self.update_record(state);
                return Err(PipelineError::Cancelled);
            }

            state.cursor += pending.group.len();
            self.checkpoint(state);
            self.update_record(state);
        }

        Ok(Phase::Testing)
    }

    async fn test(
        &self,
        state: &mut WorkflowState,
        control: &RunControl,
    ) -> Result<Phase, PipelineError> {
        self.emit_agent(state, "tester", EventLevel::Info, "Validating project", json!({}));
        let ctx = state.context();
        let tester = &self.agents.tester;
        let report = self
            .invoker
            .call("test", self.settings.timeouts.test, control.signal(), || {
                tester.validate(&ctx)
            })
            .await?;

        if report.passed {
            self.emit_agent(state, "tester", EventLevel::Info, "Tests passed", json!({}));
        } else {
            self.emit_agent(
                state,
                "tester",
                EventLevel::Warning,
                format!("Tests failed with {} issues", report.issues.len()),
                json!({ "issues": report.issues }),
            );
        }

        let next = route_after_test(&report, state.retry_count, self.settings.max_retries);
        if next == Phase::Done && !report.passed {
            state.completed_with_warnings = true;
            self.emit(
                state,
                "finalize",
                EventLevel::Warning,
                "Max retries reached. Project finished with warnings.",
                json!({ "issues": report.issues }),
            );
        }
        state.test_results = Some(report);
        Ok(next)
    }

    async fn correct(
        &self,
        state: &mut WorkflowState,
        control: &RunControl,
    ) -> Result<Phase, PipelineError> {
        state.retry_count += 1;
        let issues = state
            .test_results
            .as_ref()
            .map(|report| report.issues.clone())
            .unwrap_or_default();
        self.emit_agent(
            state,
            "corrector",
            EventLevel::Info,
            format!(
                "Applying corrections (attempt {}/{})",
                state.retry_count, self.settings.max_retries
            ),
            json!({ "retry_count": state.retry_count, "issue_count": issues.len() }),
        );

        let ctx = state.context();
        let corrector = &self.agents.corrector;
        let signal = control.signal();
        let result = self
            .invoker
            .call("correct", self.settings.timeouts.correct, signal, || {
                corrector.fix(&ctx, &issues, signal)
            })
            .await;

        match result {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => {
                warn!(run_id = %state.run_id, error = %err, "Correction failed, no fix applied");
                self.emit_agent(
                    state,
                    "corrector",
                    EventLevel::Warning,
                    "Correction failed, no fix applied",
                    json!({ "error": err.to_string() }),
                );
            }
        }
        Ok(Phase::Testing)
    }

    /// Apply a transition and publish it. An edge missing from the graph fails the run.
    fn advance(&self, state: &mut WorkflowState, next: Phase) {
        let from = state.phase;
        if let Err(err) = state.transition(next) {
            warn!(run_id = %state.run_id, error = %err, "Rejected phase transition");
            state.error = Some(err.to_string());
            state.phase = Phase::Failed;
        }
        if state.phase.is_terminal() {
            state.reset_interrupted_steps();
        }

        let data = PhaseChangedData {
            from: from.to_string(),
            to: state.phase.to_string(),
            retry_count: state.retry_count,
            cursor: state.cursor,
        };
        let level = match state.phase {
            Phase::Failed => EventLevel::Error,
            Phase::Stopped => EventLevel::Warning,
            _ => EventLevel::Info,
        };
        info!(run_id = %state.run_id, from = %from, to = %state.phase, "Phase changed");
        self.emit(
            state,
            "phase_changed",
            level,
            format!("{} -> {}", from, state.phase),
            serde_json::to_value(&data).unwrap_or_default(),
        );
        if state.phase.is_terminal() {
            self.emit_finished(state);
        }

        self.checkpoint(state);
        self.update_record(state);
    }

    pub(crate) fn emit_finished(&self, state: &WorkflowState) {
        let (level, message) = match state.phase {
            Phase::Done if state.completed_with_warnings => {
                (EventLevel::Warning, "Run finished with warnings".to_string())
            }
            Phase::Done => (EventLevel::Info, "Run finished".to_string()),
            Phase::Stopped => (EventLevel::Warning, "Run stopped".to_string()),
            _ => (
                EventLevel::Error,
                format!(
                    "Run failed: {}",
                    state.error.as_deref().unwrap_or("unknown error")
                ),
            ),
        };
        self.emit(
            state,
            "run_finished",
            level,
            message,
            json!({
                "status": state.status().as_str(),
                "artifact_count": state.artifacts.len(),
                "retry_count": state.retry_count,
                "completed_with_warnings": state.completed_with_warnings,
                "error": state.error,
            }),
        );
    }

    /// Best-effort checkpoint write.
    pub(crate) fn checkpoint(&self, state: &WorkflowState) {
        if let Err(err) = self.checkpoints.save(&Checkpoint::new(state)) {
            warn!(
                run_id = %state.run_id,
                phase = %state.phase,
                error = %err,
                "failed to write checkpoint"
            );
        }
    }

    /// Best-effort run record write; keeps the original creation time.
    pub(crate) fn update_record(&self, state: &WorkflowState) {
        let created_at = match self.runs.get(&state.run_id) {
            Ok(Some(existing)) => existing.created_at,
            _ => Utc::now(),
        };
        let record = RunRecord::from_state(state, created_at);
        if let Err(err) = self.runs.put(&record) {
            warn!(run_id = %state.run_id, error = %err, "failed to write run record");
        }
    }

    pub(crate) fn emit(
        &self,
        state: &WorkflowState,
        kind: &str,
        level: EventLevel,
        message: impl Into<String>,
        data: serde_json::Value,
    ) {
        self.events
            .emit(RunEvent::new(state.run_id.clone(), kind, level, message, data));
    }

    fn emit_agent(
        &self,
        state: &WorkflowState,
        agent: &str,
        level: EventLevel,
        message: impl Into<String>,
        data: serde_json::Value,
    ) {
        self.events.emit(
            RunEvent::new(state.run_id.clone(), "agent_message", level, message, data)
                .with_agent(agent),
        );
    }
}

fn research_query(state: &WorkflowState) -> String {
    let mut parts = vec![state.description.trim().to_string()];
    if let Some(stack) = state.metadata.get("tech_stack").map(|s| s.trim()) {
        if !stack.is_empty() {
            parts.push(format!("tech stack {}", stack));
        }
    }
    if !state.target.trim().is_empty() {
        parts.push(format!("target {}", state.target.trim()));
    }
    parts.push("best practices".to_string());
    parts
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
