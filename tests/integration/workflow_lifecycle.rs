//! Integration tests for the end-to-end workflow: routing, correction loop, and failure paths.

use crate::integration::test_utils::{
    step, CountingCorrector, Fixture, ScriptedGenerator, ScriptedResearcher, ScriptedTester,
};
use async_trait::async_trait;
use foundry::agent::{Planner, RunContext, TestReport};
use foundry::error::PipelineError;
use foundry::pipeline::{
    Orchestrator, Phase, PhaseTimeouts, PipelineSettings, Plan, RunRequest, RunStatus, StepStatus,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn setup_plan() -> Plan {
    Plan::new(vec![
        step("a", Some("setup")),
        step("b", Some("setup")),
        step("c", None),
    ])
}

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .collect()
}

#[tokio::test]
async fn grouped_plan_runs_to_done() {
    let fx = Fixture::new(
        setup_plan(),
        ScriptedGenerator::with_delay(Duration::from_millis(5)),
        ScriptedTester::passing(),
    );
    let orchestrator = fx.orchestrator(4);

    let handle = orchestrator
        .start(RunRequest::new("todo", "A todo CLI", "cli"))
        .unwrap();
    let run_id = handle.run_id().clone();
    let state = handle.wait().await.unwrap();

    assert_eq!(state.phase, Phase::Done);
    assert!(!state.completed_with_warnings);
    assert_eq!(state.cursor, 3);
    assert_eq!(state.artifacts.len(), 3);
    assert_eq!(
        fx.sink.transitions(),
        pairs(&[
            ("planning", "generating"),
            ("generating", "testing"),
            ("testing", "done"),
        ])
    );

    let record = orchestrator.status(&run_id).unwrap();
    assert_eq!(record.status, RunStatus::Done);
    assert!(record.steps.iter().all(|s| s.status == StepStatus::Done));

    let kinds = fx.sink.kinds();
    assert_eq!(kinds.first().map(String::as_str), Some("run_started"));
    assert_eq!(kinds.last().map(String::as_str), Some("run_finished"));
    assert_eq!(kinds.iter().filter(|k| *k == "group_started").count(), 2);
    assert_eq!(fx.test_calls(), 1);
    assert_eq!(fx.correct_calls(), 0);
}

#[tokio::test]
async fn correction_loop_is_bounded_and_finishes_degraded() {
    let failing = || TestReport::failed(vec!["main.rs: missing".to_string()]);
    let fx = Fixture::new(
        setup_plan(),
        ScriptedGenerator::default(),
        ScriptedTester::new(vec![failing(), failing(), failing(), failing()]),
    );
    let orchestrator = fx
        .builder(2)
        .settings(PipelineSettings {
            max_retries: 2,
            enable_research: false,
            ..PipelineSettings::default()
        })
        .build();

    let state = orchestrator
        .start(RunRequest::new("todo", "A todo CLI", "cli"))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(state.phase, Phase::Done);
    assert!(state.completed_with_warnings);
    assert_eq!(state.retry_count, 2);
    assert_eq!(fx.correct_calls(), 2);
    assert_eq!(fx.test_calls(), 3);

    let after_generate: Vec<(String, String)> = fx
        .sink
        .transitions()
        .into_iter()
        .skip_while(|(from, _)| from != "testing")
        .collect();
    assert_eq!(
        after_generate,
        pairs(&[
            ("testing", "correcting"),
            ("correcting", "testing"),
            ("testing", "correcting"),
            ("correcting", "testing"),
            ("testing", "done"),
        ])
    );

    let finalize = fx
        .sink
        .events()
        .into_iter()
        .find(|e| e.kind == "finalize")
        .unwrap();
    assert_eq!(finalize.message, "Max retries reached. Project finished with warnings.");
    assert!(orchestrator.status(&state.run_id).unwrap().completed_with_warnings);
}

#[tokio::test]
async fn one_correction_then_clean_pass() {
    let fx = Fixture::new(
        setup_plan(),
        ScriptedGenerator::default(),
        ScriptedTester::new(vec![TestReport::failed(vec!["x: empty".to_string()])]),
    );
    let state = fx
        .orchestrator(2)
        .start(RunRequest::new("t", "d", "cli"))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(state.phase, Phase::Done);
    assert!(!state.completed_with_warnings);
    assert_eq!(state.retry_count, 1);
    assert_eq!(fx.correct_calls(), 1);
}

#[tokio::test]
async fn corrector_failure_does_not_fail_the_run() {
    let mut fx = Fixture::new(
        setup_plan(),
        ScriptedGenerator::default(),
        ScriptedTester::new(vec![TestReport::failed(vec!["x: empty".to_string()])]),
    );
    fx.corrector = Arc::new(CountingCorrector {
        fail: true,
        ..Default::default()
    });
    let state = fx
        .orchestrator(2)
        .start(RunRequest::new("t", "d", "cli"))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(state.phase, Phase::Done);
    assert_eq!(fx.correct_calls(), 1);
    assert!(fx
        .sink
        .events()
        .iter()
        .any(|e| e.agent.as_deref() == Some("corrector") && e.message.contains("Correction failed")));
}

#[tokio::test]
async fn step_failure_fails_run_and_skips_later_groups() {
    let fx = Fixture::new(
        setup_plan(),
        ScriptedGenerator::default().failing("b"),
        ScriptedTester::passing(),
    );
    let orchestrator = fx.orchestrator(2);
    let state = orchestrator
        .start(RunRequest::new("t", "d", "cli"))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(state.phase, Phase::Failed);
    let error = state.error.clone().unwrap();
    assert!(error.contains("Step b failed"), "unexpected error: {}", error);
    assert!(!fx.generator.started().contains(&"c".to_string()));
    assert_eq!(fx.test_calls(), 0);
    assert_eq!(fx.correct_calls(), 0);
    assert_eq!(state.step_status(&"b".into()), StepStatus::Failed);

    let record = orchestrator.status(&state.run_id).unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.error.as_deref(), Some(error.as_str()));
}

#[tokio::test]
async fn empty_plan_is_fatal() {
    let fx = Fixture::new(Plan::default(), ScriptedGenerator::default(), ScriptedTester::passing());
    let state = fx
        .orchestrator(1)
        .start(RunRequest::new("t", "d", "cli"))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(state.phase, Phase::Failed);
    assert!(state.error.unwrap().contains("Invalid plan"));
    assert!(fx.generator.started().is_empty());
}

struct FailingPlanner;

#[async_trait]
impl Planner for FailingPlanner {
    async fn plan(&self, _ctx: &RunContext) -> Result<Plan, PipelineError> {
        Err(PipelineError::ProviderAuthFailed("invalid api key".to_string()))
    }
}

#[tokio::test]
async fn planner_error_fails_without_correction() {
    let fx = Fixture::new(Plan::default(), ScriptedGenerator::default(), ScriptedTester::passing());
    let mut agents = fx.agents();
    agents.planner = Arc::new(FailingPlanner);
    let orchestrator = Orchestrator::builder(agents)
        .events(fx.sink.clone())
        .build();
    let state = orchestrator
        .start(RunRequest::new("t", "d", "cli"))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(state.phase, Phase::Failed);
    assert!(state.error.unwrap().starts_with("Planning failed"));
    assert_eq!(fx.correct_calls(), 0);
    assert_eq!(
        fx.sink.transitions(),
        vec![("planning".to_string(), "failed".to_string())]
    );
}

#[tokio::test]
async fn research_results_reach_later_agents() {
    let fx = Fixture::new(setup_plan(), ScriptedGenerator::default(), ScriptedTester::passing());
    let researcher = Arc::new(ScriptedResearcher {
        error: None,
        delay: Duration::ZERO,
        queries: Mutex::new(Vec::new()),
    });
    let agents = fx.agents().with_researcher(researcher.clone());
    let orchestrator = Orchestrator::builder(agents)
        .events(fx.sink.clone())
        .build();

    let state = orchestrator
        .start(RunRequest::new("t", "A todo CLI", "cli").with_metadata("tech_stack", "rust"))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(state.phase, Phase::Done);
    let research = state.research.unwrap();
    assert_eq!(research.results.len(), 1);
    assert!(research.error.is_none());
    assert_eq!(state.metadata.get("tech_stack").map(String::as_str), Some("rust"));
    assert_eq!(
        fx.sink.transitions()[..2].to_vec(),
        pairs(&[("planning", "researching"), ("researching", "generating")])
    );
    assert_eq!(researcher.queries.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn research_timeout_degrades_to_empty_result() {
    let fx = Fixture::new(setup_plan(), ScriptedGenerator::default(), ScriptedTester::passing());
    let agents = fx.agents().with_researcher(Arc::new(ScriptedResearcher {
        error: None,
        delay: Duration::from_secs(60),
        queries: Mutex::new(Vec::new()),
    }));
    let orchestrator = Orchestrator::builder(agents)
        .events(fx.sink.clone())
        .settings(PipelineSettings {
            timeouts: PhaseTimeouts {
                research: Duration::from_secs(15),
                ..PhaseTimeouts::default()
            },
            ..PipelineSettings::default()
        })
        .build();

    let started = tokio::time::Instant::now();
    let state = orchestrator
        .start(RunRequest::new("t", "d", "cli"))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(state.phase, Phase::Done);
    assert!(started.elapsed() < Duration::from_secs(60));
    let research = state.research.unwrap();
    assert!(research.results.is_empty());
    assert!(research.error.unwrap().contains("timed out"));
    assert!(fx
        .sink
        .events()
        .iter()
        .any(|e| e.agent.as_deref() == Some("researcher") && e.message.contains("continuing without results")));
}

#[tokio::test]
async fn research_error_degrades_and_run_continues() {
    let fx = Fixture::new(setup_plan(), ScriptedGenerator::default(), ScriptedTester::passing());
    let agents = fx.agents().with_researcher(Arc::new(ScriptedResearcher {
        error: Some(|| PipelineError::ProviderUnavailable("search down".to_string())),
        delay: Duration::ZERO,
        queries: Mutex::new(Vec::new()),
    }));
    let orchestrator = Orchestrator::builder(agents)
        .events(fx.sink.clone())
        .build();
    let state = orchestrator
        .start(RunRequest::new("t", "d", "cli"))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(state.phase, Phase::Done);
    assert!(state.research.unwrap().error.unwrap().contains("search down"));
    assert_eq!(fx.generator.started().len(), 3);
}
