//! Foundry: Crash-Resumable Code Generation Pipelines
//!
//! Drives a plan, research, generate, test and correct workflow against pluggable agents. Plan
//! steps sharing a group key run concurrently behind a barrier, every agent call passes through
//! a process-wide concurrency gate with retry and timeout handling, and each transition is
//! checkpointed so an interrupted run resumes at the phase it reached.

pub mod agent;
pub mod cli;
pub mod concurrency;
pub mod config;
pub mod control;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod retry;
pub mod store;
pub mod telemetry;
pub mod types;
