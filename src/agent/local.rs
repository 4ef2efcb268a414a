//! Filesystem-backed agents.
//!
//! A deterministic agent set that needs no model provider: the plan is read from a JSON file
//! named by the `plan_file` request metadata, and each step's payload carries the file it
//! produces:
//!
//! ```json
//! { "path": "src/main.rs", "content": "fn main() {}", "expect": "fn main" }
//! ```
//!
//! Files land under `<output_root>/<run_id>/`. The tester reports missing, empty and
//! unexpected files; the corrector rewrites the files named in those reports from the plan.

use super::{Artifact, Corrector, Generator, Planner, RunContext, TestReport, Tester};
use crate::control::StopSignal;
use crate::error::PipelineError;
use crate::pipeline::plan::{Plan, Step};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Metadata key naming the plan file.
pub const PLAN_FILE_KEY: &str = "plan_file";

/// File description carried in a step payload.
#[derive(Debug, Clone, Deserialize)]
pub struct FileSpec {
    pub path: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub expect: Option<String>,
}

impl FileSpec {
    /// `None` when the step carries no file payload.
    pub fn from_step(step: &Step) -> Result<Option<Self>, PipelineError> {
        if step.payload.is_null() {
            return Ok(None);
        }
        serde_json::from_value(step.payload.clone())
            .map(Some)
            .map_err(|e| PipelineError::InvalidPlan(format!("step {}: {}", step.id, e)))
    }
}

/// Shared root for every local agent.
#[derive(Debug, Clone)]
pub struct LocalWorkspace {
    output_root: PathBuf,
}

impl LocalWorkspace {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn run_dir(&self, ctx: &RunContext) -> PathBuf {
        self.output_root.join(ctx.run_id.as_str())
    }

    /// Resolve a payload path inside the run directory. Absolute paths and `..` are rejected.
    pub fn resolve(&self, ctx: &RunContext, relative: &str) -> Result<PathBuf, PipelineError> {
        let path = Path::new(relative);
        let escapes = relative.is_empty()
            || path.components().any(|component| {
                !matches!(component, Component::Normal(_) | Component::CurDir)
            });
        if escapes {
            return Err(PipelineError::AgentFailed {
                agent: "generator".to_string(),
                message: format!("refusing to write outside the project: {}", relative),
            });
        }
        Ok(self.run_dir(ctx).join(path))
    }

    async fn write_file(&self, ctx: &RunContext, spec: &FileSpec) -> Result<Artifact, PipelineError> {
        let target = self.resolve(ctx, &spec.path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, spec.content.as_bytes()).await?;
        debug!(run_id = %ctx.run_id, path = %spec.path, "Wrote file");
        Ok(Artifact {
            path: spec.path.clone(),
            size_bytes: spec.content.len() as u64,
        })
    }

    /// Planner, generator, tester and corrector sharing this workspace.
    pub fn agents(self) -> super::Agents {
        let shared = Arc::new(self);
        super::Agents::new(
            Arc::new(FilePlanner),
            Arc::new(FileGenerator::new(Arc::clone(&shared))),
            Arc::new(FileTester::new(Arc::clone(&shared))),
            Arc::new(FileCorrector::new(shared)),
        )
    }
}

/// Reads the plan from the file named by [`PLAN_FILE_KEY`].
pub struct FilePlanner;

#[async_trait]
impl Planner for FilePlanner {
    async fn plan(&self, ctx: &RunContext) -> Result<Plan, PipelineError> {
        let Some(path) = ctx.metadata.get(PLAN_FILE_KEY) else {
            return Err(PipelineError::InvalidPlan(format!(
                "request has no {} metadata",
                PLAN_FILE_KEY
            )));
        };
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::AgentFailed {
                agent: "planner".to_string(),
                message: format!("cannot read plan {}: {}", path, e),
            })?;
        let plan: Plan = serde_json::from_str(&raw)
            .map_err(|e| PipelineError::InvalidPlan(format!("{}: {}", path, e)))?;
        for step in plan.steps() {
            FileSpec::from_step(step)?;
        }
        Ok(plan)
    }
}

pub struct FileGenerator {
    workspace: Arc<LocalWorkspace>,
}

impl FileGenerator {
    pub fn new(workspace: Arc<LocalWorkspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Generator for FileGenerator {
    async fn execute(
        &self,
        step: &Step,
        ctx: &RunContext,
        stop: &StopSignal,
    ) -> Result<Vec<Artifact>, PipelineError> {
        if stop.is_stopped() {
            return Err(PipelineError::Cancelled);
        }
        match FileSpec::from_step(step)? {
            Some(spec) => Ok(vec![self.workspace.write_file(ctx, &spec).await?]),
            None => Ok(Vec::new()),
        }
    }
}

pub struct FileTester {
    workspace: Arc<LocalWorkspace>,
}

impl FileTester {
    pub fn new(workspace: Arc<LocalWorkspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tester for FileTester {
    async fn validate(&self, ctx: &RunContext) -> Result<TestReport, PipelineError> {
        let mut issues = Vec::new();
        for step in ctx.plan.steps() {
            let Some(spec) = FileSpec::from_step(step)? else {
                continue;
            };
            let target = self.workspace.resolve(ctx, &spec.path)?;
            match tokio::fs::read_to_string(&target).await {
                Err(_) => issues.push(format!("{}: missing", spec.path)),
                Ok(content) if content.trim().is_empty() => {
                    issues.push(format!("{}: empty", spec.path))
                }
                Ok(content) => {
                    if let Some(expected) = &spec.expect {
                        if !content.contains(expected.as_str()) {
                            issues.push(format!("{}: expected `{}`", spec.path, expected));
                        }
                    }
                }
            }
        }
        Ok(if issues.is_empty() {
            TestReport::passed()
        } else {
            TestReport::failed(issues)
        })
    }
}

/// Rewrites every file named by an issue from its plan payload.
pub struct FileCorrector {
    workspace: Arc<LocalWorkspace>,
}

impl FileCorrector {
    pub fn new(workspace: Arc<LocalWorkspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Corrector for FileCorrector {
    async fn fix(
        &self,
        ctx: &RunContext,
        issues: &[String],
        stop: &StopSignal,
    ) -> Result<(), PipelineError> {
        for issue in issues {
            if stop.is_stopped() {
                return Err(PipelineError::Cancelled);
            }
            let path = issue.split_once(": ").map(|(path, _)| path).unwrap_or(issue);
            let spec = ctx
                .plan
                .steps()
                .iter()
                .filter_map(|step| FileSpec::from_step(step).ok().flatten())
                .find(|spec| spec.path == path);
            match spec {
                Some(spec) => {
                    self.workspace.write_file(ctx, &spec).await?;
                }
                None => debug!(run_id = %ctx.run_id, issue = %issue, "No plan entry for issue"),
            }
        }
        Ok(())
    }
}
