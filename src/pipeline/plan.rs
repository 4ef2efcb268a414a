use crate::error::PipelineError;
use crate::types::StepId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Agent role a step is addressed to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepRole {
    Generator,
    Writer,
    Ceo,
    Reviewer,
    Refactor,
}

impl StepRole {
    pub fn as_str(self) -> &'static str {
        match self {
            StepRole::Generator => "generator",
            StepRole::Writer => "writer",
            StepRole::Ceo => "ceo",
            StepRole::Reviewer => "reviewer",
            StepRole::Refactor => "refactor",
        }
    }
}

/// One unit of work produced by the planner.
///
/// `payload` is opaque to the orchestrator and handed to the generator untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub id: StepId,
    pub name: String,
    pub role: StepRole,
    #[serde(default, alias = "parallel_group", skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl Step {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: StepRole) -> Self {
        Self {
            id: StepId::new(id),
            name: name.into(),
            role,
            group_key: None,
            payload: Value::Null,
        }
    }

    pub fn with_group(mut self, group_key: impl Into<String>) -> Self {
        self.group_key = Some(group_key.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Group key used for co-execution; ungrouped steps fall back to their own id.
    pub fn effective_group_key(&self) -> &str {
        match self.group_key.as_deref() {
            Some(key) if !key.trim().is_empty() => key,
            _ => self.id.as_str(),
        }
    }
}

/// Ordered list of steps. Immutable once the plan phase has produced it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(from = "PlanRepr", into = "PlanRepr")]
pub struct Plan {
    steps: Vec<Step>,
}

/// Plans are accepted either as `{"steps": [...]}` or as a bare step array.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PlanRepr {
    Wrapped { steps: Vec<Step> },
    Bare(Vec<Step>),
}

impl From<PlanRepr> for Plan {
    fn from(value: PlanRepr) -> Self {
        match value {
            PlanRepr::Wrapped { steps } | PlanRepr::Bare(steps) => Plan { steps },
        }
    }
}

impl From<Plan> for PlanRepr {
    fn from(value: Plan) -> Self {
        PlanRepr::Wrapped { steps: value.steps }
    }
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.steps.iter().find(|step| &step.id == id)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.as_str().trim().is_empty() {
                return Err(PipelineError::InvalidPlan(format!(
                    "Step '{}' has an empty id",
                    step.name
                )));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(PipelineError::InvalidPlan(format!(
                    "Duplicate step id '{}'",
                    step.id
                )));
            }
        }
        Ok(())
    }
}
