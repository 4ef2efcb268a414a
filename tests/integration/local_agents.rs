//! End-to-end tests for the filesystem agents and the CLI context over a temp data dir.

use foundry::agent::local::{LocalWorkspace, PLAN_FILE_KEY};
use foundry::cli::{CliContext, Commands, ConfigCommands};
use foundry::config::FoundryConfig;
use foundry::error::PipelineError;
use foundry::pipeline::{Orchestrator, Phase, RunRequest, RunStatus};
use foundry::retry::RetryPolicy;
use foundry::store::RunRecord;
use foundry::telemetry::RecordedEvent;
use serde_json::json;
use std::path::Path;
use tempfile::TempDir;

fn write_plan(dir: &Path) -> std::path::PathBuf {
    let plan = json!({
        "steps": [
            {
                "id": "manifest",
                "name": "Cargo manifest",
                "role": "generator",
                "group_key": "setup",
                "payload": { "path": "Cargo.toml", "content": "[package]\nname = \"todo\"\n", "expect": "[package]" }
            },
            {
                "id": "readme",
                "name": "Readme",
                "role": "writer",
                "group_key": "setup",
                "payload": { "path": "README.md", "content": "# todo\n" }
            },
            {
                "id": "main",
                "name": "Entry point",
                "role": "generator",
                "payload": { "path": "src/main.rs", "content": "fn main() {}\n", "expect": "fn main" }
            }
        ]
    });
    let path = dir.join("plan.json");
    std::fs::write(&path, serde_json::to_string_pretty(&plan).unwrap()).unwrap();
    path
}

fn config_in(dir: &Path) -> FoundryConfig {
    let mut config = FoundryConfig::default();
    config.storage.data_dir = dir.join("data");
    config.pipeline.enable_research = false;
    config
}

#[tokio::test]
async fn local_agents_write_the_planned_project() {
    let temp = TempDir::new().unwrap();
    let plan = write_plan(temp.path());
    let out = temp.path().join("out");

    let orchestrator = Orchestrator::builder(LocalWorkspace::new(&out).agents())
        .retry_policy(RetryPolicy::no_retry())
        .build();
    let state = orchestrator
        .start(
            RunRequest::new("todo", "A todo CLI", "cli")
                .with_metadata(PLAN_FILE_KEY, plan.to_string_lossy()),
        )
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(state.phase, Phase::Done);
    assert!(!state.completed_with_warnings);
    assert_eq!(state.artifacts.len(), 3);
    let run_dir = out.join(state.run_id.as_str());
    assert_eq!(
        std::fs::read_to_string(run_dir.join("src/main.rs")).unwrap(),
        "fn main() {}\n"
    );
    assert!(run_dir.join("Cargo.toml").exists());
    assert!(run_dir.join("README.md").exists());
}

#[tokio::test]
async fn missing_plan_file_fails_planning() {
    let temp = TempDir::new().unwrap();
    let orchestrator = Orchestrator::builder(LocalWorkspace::new(temp.path()).agents())
        .retry_policy(RetryPolicy::no_retry())
        .build();
    let state = orchestrator
        .start(
            RunRequest::new("todo", "d", "cli")
                .with_metadata(PLAN_FILE_KEY, temp.path().join("nope.json").to_string_lossy()),
        )
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(state.phase, Phase::Failed);
    assert!(state.error.unwrap().starts_with("Planning failed"));
}

#[test]
fn cli_run_then_inspect() {
    let temp = TempDir::new().unwrap();
    let plan = write_plan(temp.path());
    let ctx = CliContext::with_config(temp.path().to_path_buf(), config_in(temp.path())).unwrap();

    let summary = ctx
        .execute(&Commands::Run {
            title: "todo".to_string(),
            description: "A todo CLI".to_string(),
            target: "cli".to_string(),
            plan,
            metadata: vec!["tech_stack=rust".to_string()],
            no_research: true,
            quiet: true,
        })
        .unwrap();
    assert!(summary.contains("3 files written"));

    let listed = ctx
        .execute(&Commands::List {
            format: "json".to_string(),
        })
        .unwrap();
    let records: Vec<RunRecord> = serde_json::from_str(&listed).unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.status, RunStatus::Done);
    assert_eq!(record.steps.len(), 3);

    let status = ctx
        .execute(&Commands::Status {
            run_id: record.run_id.to_string(),
            format: "text".to_string(),
        })
        .unwrap();
    assert!(status.contains("todo"));
    assert!(status.contains("Entry point"));

    let events = ctx
        .execute(&Commands::Events {
            run_id: record.run_id.to_string(),
            after: None,
            format: "json".to_string(),
        })
        .unwrap();
    let events: Vec<RecordedEvent> = serde_json::from_str(&events).unwrap();
    assert_eq!(events.first().unwrap().event.kind, "run_started");
    assert_eq!(events.last().unwrap().event.kind, "run_finished");

    let tail = ctx
        .execute(&Commands::Events {
            run_id: record.run_id.to_string(),
            after: Some(events.len() as u64 - 1),
            format: "json".to_string(),
        })
        .unwrap();
    let tail: Vec<RecordedEvent> = serde_json::from_str(&tail).unwrap();
    assert_eq!(tail.len(), 1);
}

#[test]
fn cli_status_of_unknown_run_is_not_found() {
    let temp = TempDir::new().unwrap();
    let ctx = CliContext::with_config(temp.path().to_path_buf(), config_in(temp.path())).unwrap();
    let err = ctx
        .execute(&Commands::Status {
            run_id: "ghost".to_string(),
            format: "text".to_string(),
        })
        .unwrap_err();
    assert!(matches!(err, PipelineError::RunNotFound(_)));

    let listed = ctx
        .execute(&Commands::List {
            format: "text".to_string(),
        })
        .unwrap();
    assert!(listed.contains("No runs"));
}

#[test]
fn cli_rejects_malformed_metadata() {
    let temp = TempDir::new().unwrap();
    let plan = write_plan(temp.path());
    let ctx = CliContext::with_config(temp.path().to_path_buf(), config_in(temp.path())).unwrap();
    let err = ctx
        .execute(&Commands::Run {
            title: "todo".to_string(),
            description: String::new(),
            target: "cli".to_string(),
            plan,
            metadata: vec!["no-separator".to_string()],
            no_research: true,
            quiet: true,
        })
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidArgument(_)));
}

#[test]
fn cli_recover_with_nothing_pending() {
    let temp = TempDir::new().unwrap();
    let ctx = CliContext::with_config(temp.path().to_path_buf(), config_in(temp.path())).unwrap();
    let out = ctx.execute(&Commands::Recover).unwrap();
    assert!(out.contains("Nothing to recover"));
}

#[test]
fn cli_config_show_and_invalid_config() {
    let temp = TempDir::new().unwrap();
    let ctx = CliContext::with_config(temp.path().to_path_buf(), config_in(temp.path())).unwrap();
    let shown = ctx
        .execute(&Commands::Config {
            command: ConfigCommands::Show {
                format: "toml".to_string(),
            },
        })
        .unwrap();
    assert!(shown.contains("llm_concurrency = 10"));

    let mut bad = config_in(temp.path());
    bad.pipeline.llm_concurrency = 0;
    let err = CliContext::with_config(temp.path().to_path_buf(), bad).err().unwrap();
    assert!(matches!(err, PipelineError::ConfigError(_)));
}
