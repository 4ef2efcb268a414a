//! Retry/Backoff Policy
//!
//! Applies to a single external collaborator call, never to the run-level correction loop.
//! Rate limiting and transient unavailability are retried along a fixed escalating schedule;
//! a timeout is retried a bounded number of times; authentication failures are never retried.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a collaborator failure should be handled by the call layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    TransientRateLimited,
    Timeout,
    Fatal,
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Backoff schedule in seconds; its length bounds the number of retries
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: Vec<u64>,

    /// Number of times a timed-out call is retried before the timeout becomes fatal
    #[serde(default = "default_timeout_retries")]
    pub timeout_retries: u32,
}

fn default_backoff_secs() -> Vec<u64> {
    vec![10, 20, 40]
}

fn default_timeout_retries() -> u32 {
    1
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_secs: default_backoff_secs(),
            timeout_retries: default_timeout_retries(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    schedule: Vec<Duration>,
    timeout_retries: u32,
}

impl RetryPolicy {
    pub fn new(schedule: Vec<Duration>, timeout_retries: u32) -> Self {
        Self {
            schedule,
            timeout_retries,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config
                .backoff_secs
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect(),
            config.timeout_retries,
        )
    }

    /// A policy that surfaces the first failure unchanged.
    pub fn no_retry() -> Self {
        Self::new(Vec::new(), 0)
    }

    pub fn classify(error: &PipelineError) -> FailureClass {
        match error {
            PipelineError::ProviderRateLimit(_) | PipelineError::ProviderUnavailable(_) => {
                FailureClass::TransientRateLimited
            }
            PipelineError::ProviderTimeout { .. } => FailureClass::Timeout,
            _ => FailureClass::Fatal,
        }
    }

    /// Wait before retry number `attempt_index` (zero-based), or `None` once the schedule is spent.
    pub fn next_wait(&self, attempt_index: usize) -> Option<Duration> {
        self.schedule.get(attempt_index).copied()
    }

    /// Total attempts including the first call.
    pub fn max_attempts(&self) -> usize {
        self.schedule.len() + 1
    }

    pub fn timeout_retries(&self) -> u32 {
        self.timeout_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
