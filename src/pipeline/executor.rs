//! Group executor: runs one group of co-executable steps behind a barrier.
//! Owns per-step telemetry; state mutation and checkpointing stay with the workflow machine.

use crate::agent::{Artifact, Generator, RunContext};
use crate::control::StopSignal;
use crate::error::PipelineError;
use crate::pipeline::grouping::PendingGroup;
use crate::pipeline::invoke::Invoker;
use crate::pipeline::plan::Step;
use crate::telemetry::{EventLevel, EventSink, RunEvent, StepEventData};
use crate::types::{RunId, StepId};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct StepOutcome {
    pub step_id: StepId,
    pub result: Result<Vec<Artifact>, PipelineError>,
}

/// Outcomes of every step in a group, in completion order.
#[derive(Debug, Default)]
pub struct GroupReport {
    pub outcomes: Vec<StepOutcome>,
}

impl GroupReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.result.is_ok())
    }

    /// First failure that was not a cancellation.
    pub fn first_failure(&self) -> Option<(&StepId, &PipelineError)> {
        self.outcomes.iter().find_map(|outcome| match &outcome.result {
            Err(err) if !err.is_cancelled() => Some((&outcome.step_id, err)),
            _ => None,
        })
    }
}

/// Executes groups against a generator through the shared invoker.
pub struct GroupExecutor {
    generator: Arc<dyn Generator>,
    invoker: Invoker,
    events: Arc<dyn EventSink>,
    step_timeout: Duration,
}

impl GroupExecutor {
    pub fn new(
        generator: Arc<dyn Generator>,
        invoker: Invoker,
        events: Arc<dyn EventSink>,
        step_timeout: Duration,
    ) -> Self {
        Self {
            generator,
            invoker,
            events,
            step_timeout,
        }
    }

    /// Run every step of `pending` concurrently and return once all of them have settled.
    ///
    /// The first real failure sets a group-local stop signal so the remaining steps are
    /// cancelled at their next check point. The run-wide `stop` is never set from here.
    pub async fn run_group(
        &self,
        pending: &PendingGroup,
        ctx: &RunContext,
        stop: &StopSignal,
    ) -> GroupReport {
        let run_id = &ctx.run_id;
        let group_index = pending.index;
        self.emit(
            run_id,
            "group_started",
            EventLevel::Info,
            format!(
                "Starting group {}/{} ({} steps)",
                group_index + 1,
                pending.total,
                pending.group.len()
            ),
            json!({
                "group_index": group_index,
                "total_groups": pending.total,
                "group_key": pending.group.key,
                "step_count": pending.group.len(),
            }),
        );

        let abort = stop.child();
        let mut futures = FuturesUnordered::new();
        for step in &pending.group.steps {
            let abort = &abort;
            futures.push(async move {
                let result = self.run_step(group_index, step, ctx, abort).await;
                (step, result)
            });
        }

        let mut report = GroupReport::default();
        let mut failed_count = 0usize;
        while let Some((step, result)) = futures.next().await {
            match &result {
                Ok(artifacts) => {
                    self.emit_step(
                        run_id,
                        "step_completed",
                        EventLevel::Info,
                        format!("Completed {}", step.name),
                        group_index,
                        step,
                        Some(artifacts.len()),
                        None,
                    );
                }
                Err(err) if err.is_cancelled() => {
                    debug!(run_id = %run_id, step_id = %step.id, "Step cancelled");
                    self.emit_step(
                        run_id,
                        "step_cancelled",
                        EventLevel::Warning,
                        format!("Cancelled {}", step.name),
                        group_index,
                        step,
                        None,
                        None,
                    );
                }
                Err(err) => {
                    failed_count += 1;
                    warn!(run_id = %run_id, step_id = %step.id, error = %err, "Step failed");
                    self.emit_step(
                        run_id,
                        "step_failed",
                        EventLevel::Error,
                        format!("Failed {}: {}", step.name, err),
                        group_index,
                        step,
                        None,
                        Some(err.to_string()),
                    );
                    if !abort.is_stopped() {
                        abort.stop();
                    }
                }
            }
            report.outcomes.push(StepOutcome {
                step_id: step.id.clone(),
                result,
            });
        }

        self.emit(
            run_id,
            "group_completed",
            if failed_count == 0 {
                EventLevel::Info
            } else {
                EventLevel::Error
            },
            format!("Finished group {}/{}", group_index + 1, pending.total),
            json!({
                "group_index": group_index,
                "total_groups": pending.total,
                "group_key": pending.group.key,
                "step_count": pending.group.len(),
                "failed_count": failed_count,
            }),
        );
        report
    }

    async fn run_step(
        &self,
        group_index: usize,
        step: &Step,
        ctx: &RunContext,
        stop: &StopSignal,
    ) -> Result<Vec<Artifact>, PipelineError> {
        if stop.is_stopped() {
            return Err(PipelineError::Cancelled);
        }
        let generator = &self.generator;
        let mut announced = false;
        // Attempts are made with a gate slot held, so `step_started` marks real execution.
        self.invoker
            .call("generate", self.step_timeout, stop, || {
                if !announced {
                    announced = true;
                    self.emit_step(
                        &ctx.run_id,
                        "step_started",
                        EventLevel::Info,
                        format!("Starting {}", step.name),
                        group_index,
                        step,
                        None,
                        None,
                    );
                }
                generator.execute(step, ctx, stop)
            })
            .await
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_step(
        &self,
        run_id: &RunId,
        kind: &str,
        level: EventLevel,
        message: String,
        group_index: usize,
        step: &Step,
        artifact_count: Option<usize>,
        error: Option<String>,
    ) {
        let data = StepEventData {
            group_index,
            step_id: step.id.to_string(),
            step_name: step.name.clone(),
            role: step.role.as_str().to_string(),
            artifact_count,
            error,
        };
        let data = serde_json::to_value(&data).unwrap_or_default();
        self.events.emit(
            RunEvent::new(run_id.clone(), kind, level, message, data).with_agent(step.role.as_str()),
        );
    }

    fn emit(
        &self,
        run_id: &RunId,
        kind: &str,
        level: EventLevel,
        message: String,
        data: serde_json::Value,
    ) {
        self.events
            .emit(RunEvent::new(run_id.clone(), kind, level, message, data));
    }
}
