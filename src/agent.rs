//! Agent Collaborators
//!
//! The orchestrator drives five role-based collaborators. It never looks inside what they
//! produce beyond the types below: step payloads and research results are passed through
//! untouched, and every call is made through the invoker so that gating, timeouts, retries and
//! cancellation apply uniformly.

pub mod local;

use crate::control::StopSignal;
use crate::error::PipelineError;
use crate::pipeline::plan::{Plan, Step};
use crate::types::RunId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Read-only view of a run handed to collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: RunId,
    pub title: String,
    pub description: String,
    pub target: String,
    /// Free-form request metadata (tech stack, persona, plan source...). Never interpreted here.
    pub metadata: BTreeMap<String, String>,
    pub plan: Plan,
    pub research: Option<ResearchResult>,
}

/// A file produced by a generator step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artifact {
    pub path: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TestReport {
    pub passed: bool,
    #[serde(default)]
    pub issues: Vec<String>,
}

impl TestReport {
    pub fn passed() -> Self {
        Self {
            passed: true,
            issues: Vec::new(),
        }
    }

    pub fn failed(issues: Vec<String>) -> Self {
        Self {
            passed: false,
            issues,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResearchResult {
    pub query: String,
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResearchResult {
    pub fn empty(query: impl Into<String>, error: Option<String>) -> Self {
        Self {
            query: query.into(),
            results: Vec::new(),
            error,
        }
    }
}

/// Produces the plan for a run. Failure is fatal for the run.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, ctx: &RunContext) -> Result<Plan, PipelineError>;
}

/// Optional context gathering before generation.
#[async_trait]
pub trait Researcher: Send + Sync {
    async fn research(&self, ctx: &RunContext) -> Result<ResearchResult, PipelineError>;
}

/// Executes one plan step. Must return promptly once `stop` is set.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn execute(
        &self,
        step: &Step,
        ctx: &RunContext,
        stop: &StopSignal,
    ) -> Result<Vec<Artifact>, PipelineError>;
}

/// Validates generated output. Found problems are reported in the report, not as errors.
#[async_trait]
pub trait Tester: Send + Sync {
    async fn validate(&self, ctx: &RunContext) -> Result<TestReport, PipelineError>;
}

/// Best-effort repair of reported issues.
#[async_trait]
pub trait Corrector: Send + Sync {
    async fn fix(
        &self,
        ctx: &RunContext,
        issues: &[String],
        stop: &StopSignal,
    ) -> Result<(), PipelineError>;
}

/// The set of collaborators a workflow runs against.
#[derive(Clone)]
pub struct Agents {
    pub planner: Arc<dyn Planner>,
    pub researcher: Option<Arc<dyn Researcher>>,
    pub generator: Arc<dyn Generator>,
    pub tester: Arc<dyn Tester>,
    pub corrector: Arc<dyn Corrector>,
}

impl Agents {
    pub fn new(
        planner: Arc<dyn Planner>,
        generator: Arc<dyn Generator>,
        tester: Arc<dyn Tester>,
        corrector: Arc<dyn Corrector>,
    ) -> Self {
        Self {
            planner,
            researcher: None,
            generator,
            tester,
            corrector,
        }
    }

    pub fn with_researcher(mut self, researcher: Arc<dyn Researcher>) -> Self {
        self.researcher = Some(researcher);
        self
    }
}
