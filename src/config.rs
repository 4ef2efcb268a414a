//! Configuration System
//!
//! Layered configuration through the `config` crate: built-in defaults, the global file, the
//! workspace files and environment overrides, deserialized into [`FoundryConfig`] and checked
//! with [`FoundryConfig::validate`].

use crate::concurrency::ConcurrencyGate;
use crate::logging::LoggingConfig;
use crate::pipeline::machine::{PhaseTimeouts, PipelineSettings};
use crate::retry::{RetryConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FoundryConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Upper bound on correction attempts per run
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_true")]
    pub enable_research: bool,

    /// Process-wide bound on in-flight agent calls
    #[serde(default = "default_llm_concurrency")]
    pub llm_concurrency: usize,

    /// How long a stop request waits for cooperative shutdown before aborting the run task
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

fn default_llm_concurrency() -> usize {
    ConcurrencyGate::DEFAULT_CAPACITY
}

fn default_stop_grace_ms() -> u64 {
    2000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            enable_research: default_true(),
            llm_concurrency: default_llm_concurrency(),
            stop_grace_ms: default_stop_grace_ms(),
        }
    }
}

/// Per-call wall-clock timeouts, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_plan_secs")]
    pub plan_secs: u64,
    #[serde(default = "default_research_secs")]
    pub research_secs: u64,
    #[serde(default = "default_generate_secs")]
    pub generate_secs: u64,
    #[serde(default = "default_test_secs")]
    pub test_secs: u64,
    #[serde(default = "default_correct_secs")]
    pub correct_secs: u64,
}

fn default_plan_secs() -> u64 {
    180
}

fn default_research_secs() -> u64 {
    15
}

fn default_generate_secs() -> u64 {
    120
}

fn default_test_secs() -> u64 {
    120
}

fn default_correct_secs() -> u64 {
    180
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            plan_secs: default_plan_secs(),
            research_secs: default_research_secs(),
            generate_secs: default_generate_secs(),
            test_secs: default_test_secs(),
            correct_secs: default_correct_secs(),
        }
    }
}

impl TimeoutsConfig {
    pub fn to_phase_timeouts(&self) -> PhaseTimeouts {
        PhaseTimeouts {
            plan: Duration::from_secs(self.plan_secs),
            research: Duration::from_secs(self.research_secs),
            generate: Duration::from_secs(self.generate_secs),
            test: Duration::from_secs(self.test_secs),
            correct: Duration::from_secs(self.correct_secs),
        }
    }
}

/// Storage paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root for the sled database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Where generated projects are written; `<data_dir>/projects` when unset
    #[serde(default)]
    pub output_root: Option<PathBuf>,
}

/// `$XDG_DATA_HOME/foundry` (or the platform equivalent), `.foundry` when no home is known.
pub(crate) fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "foundry")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".foundry"))
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            output_root: None,
        }
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("db")
    }

    pub fn output_root(&self) -> PathBuf {
        self.output_root
            .clone()
            .unwrap_or_else(|| self.data_dir.join("projects"))
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Pipeline(String),
    Retry(String),
    Timeouts(String),
    Storage(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Pipeline(msg) => write!(f, "Pipeline: {}", msg),
            ValidationError::Retry(msg) => write!(f, "Retry: {}", msg),
            ValidationError::Timeouts(msg) => write!(f, "Timeouts: {}", msg),
            ValidationError::Storage(msg) => write!(f, "Storage: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl FoundryConfig {
    /// Validate the entire configuration, collecting every violation.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.pipeline.llm_concurrency == 0 {
            errors.push(ValidationError::Pipeline(
                "llm_concurrency must be at least 1".to_string(),
            ));
        }

        if self.retry.timeout_retries > 5 {
            errors.push(ValidationError::Retry(format!(
                "timeout_retries must be at most 5 (got {})",
                self.retry.timeout_retries
            )));
        }

        for (name, secs) in [
            ("plan_secs", self.timeouts.plan_secs),
            ("research_secs", self.timeouts.research_secs),
            ("generate_secs", self.timeouts.generate_secs),
            ("test_secs", self.timeouts.test_secs),
            ("correct_secs", self.timeouts.correct_secs),
        ] {
            if secs == 0 {
                errors.push(ValidationError::Timeouts(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        if self.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::Storage(
                "data_dir cannot be empty".to_string(),
            ));
        }
        if let Some(output_root) = &self.storage.output_root {
            if output_root.as_os_str().is_empty() {
                errors.push(ValidationError::Storage(
                    "output_root cannot be empty".to_string(),
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            max_retries: self.pipeline.max_retries,
            enable_research: self.pipeline.enable_research,
            timeouts: self.timeouts.to_phase_timeouts(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.retry)
    }

    pub fn gate(&self) -> ConcurrencyGate {
        ConcurrencyGate::new(self.pipeline.llm_concurrency)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.pipeline.stop_grace_ms)
    }
}
