//! Event schema for run telemetry.

use crate::types::RunId;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

impl EventLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            EventLevel::Info => "info",
            EventLevel::Warning => "warning",
            EventLevel::Error => "error",
        }
    }
}

/// One progress notification, before a sequence number has been assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub ts: String,
    pub run_id: RunId,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub level: EventLevel,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

impl RunEvent {
    pub fn new(
        run_id: RunId,
        kind: impl Into<String>,
        level: EventLevel,
        message: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            run_id,
            kind: kind.into(),
            agent: None,
            level,
            message: message.into(),
            data,
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }
}

/// A persisted event with its per-run sequence number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub seq: u64,
    #[serde(flatten)]
    pub event: RunEvent,
}

impl RecordedEvent {
    pub fn from_event(event: RunEvent, seq: u64) -> Self {
        Self { seq, event }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseChangedData {
    pub from: String,
    pub to: String,
    pub retry_count: u32,
    pub cursor: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEventData {
    pub group_index: usize,
    pub step_id: String,
    pub step_name: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
