//! Integration tests for checkpointed resume and startup recovery over the sled store.

use crate::integration::test_utils::{step, Fixture, ScriptedGenerator, ScriptedTester};
use foundry::error::PipelineError;
use foundry::pipeline::{Orchestrator, Phase, Plan, RunStatus, StepStatus, WorkflowState};
use foundry::retry::RetryPolicy;
use foundry::store::{Checkpoint, CheckpointStore, RunRecord, RunStore, SledStore};
use foundry::telemetry::{EventBus, EventIngestor, EventStore};
use foundry::types::RunId;
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

fn plan() -> Plan {
    Plan::new(vec![
        step("a", Some("setup")),
        step("b", Some("setup")),
        step("c", None),
    ])
}

fn open_store(dir: &TempDir) -> Arc<SledStore> {
    SledStore::shared(sled::open(dir.path().join("db")).unwrap()).unwrap()
}

fn orchestrator(fx: &Fixture, store: &Arc<SledStore>) -> Orchestrator {
    Orchestrator::builder(fx.agents())
        .checkpoints(store.clone())
        .runs(store.clone())
        .events(fx.sink.clone())
        .retry_policy(RetryPolicy::no_retry())
        .build()
}

/// Persist `state` the way an interrupted process would have left it.
fn seed(store: &SledStore, state: &WorkflowState) {
    store.save(&Checkpoint::new(state)).unwrap();
    store
        .put(&RunRecord::from_state(state, chrono::Utc::now()))
        .unwrap();
}

fn generated_state(run_id: &str, phase: Phase) -> WorkflowState {
    let mut state = WorkflowState::new(RunId::from(run_id), "todo", "A todo CLI", "cli", BTreeMap::new());
    state.plan = plan();
    for step in state.plan.steps() {
        state.step_status.insert(step.id.clone(), StepStatus::Done);
    }
    state.cursor = 3;
    state.phase = phase;
    state
}

#[tokio::test]
async fn resume_from_testing_never_regenerates() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    seed(&store, &generated_state("r1", Phase::Testing));

    let fx = Fixture::new(plan(), ScriptedGenerator::default(), ScriptedTester::passing());
    let state = orchestrator(&fx, &store)
        .resume(&RunId::from("r1"))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(state.phase, Phase::Done);
    assert!(fx.generator.started().is_empty());
    assert_eq!(fx.plan_calls(), 0);
    assert_eq!(fx.test_calls(), 1);
    assert_eq!(
        fx.sink.transitions(),
        vec![("testing".to_string(), "done".to_string())]
    );
    assert!(fx.sink.kinds().contains(&"run_resumed".to_string()));

    let checkpoint = CheckpointStore::load(store.as_ref(), &RunId::from("r1"))
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.state.phase, Phase::Done);
    assert_eq!(
        store.get(&RunId::from("r1")).unwrap().unwrap().status,
        RunStatus::Done
    );
}

#[tokio::test]
async fn resume_mid_generate_reruns_only_the_interrupted_group() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut state = generated_state("r2", Phase::Generating);
    state.cursor = 2;
    state
        .step_status
        .insert("c".into(), StepStatus::Running);
    seed(&store, &state);

    let fx = Fixture::new(plan(), ScriptedGenerator::default(), ScriptedTester::passing());
    let finished = orchestrator(&fx, &store)
        .resume(&RunId::from("r2"))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(finished.phase, Phase::Done);
    assert_eq!(fx.generator.started(), vec!["c".to_string()]);
    assert_eq!(finished.step_status(&"c".into()), StepStatus::Done);
    assert_eq!(finished.cursor, 3);
}

#[tokio::test]
async fn resume_without_checkpoint_fails_the_run() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let state = generated_state("r3", Phase::Generating);
    store
        .put(&RunRecord::from_state(&state, chrono::Utc::now()))
        .unwrap();

    let fx = Fixture::new(plan(), ScriptedGenerator::default(), ScriptedTester::passing());
    let err = orchestrator(&fx, &store)
        .resume(&RunId::from("r3"))
        .err()
        .unwrap();
    assert!(matches!(err, PipelineError::CheckpointMissing(_)));

    let record = store.get(&RunId::from("r3")).unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert!(record.error.is_some());
    assert!(fx.generator.started().is_empty());
}

#[tokio::test]
async fn resume_with_corrupt_checkpoint_fails_the_run() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let state = generated_state("r4", Phase::Testing);
    store
        .put(&RunRecord::from_state(&state, chrono::Utc::now()))
        .unwrap();
    store
        .put_raw_checkpoint(&RunId::from("r4"), b"{not json")
        .unwrap();

    let fx = Fixture::new(plan(), ScriptedGenerator::default(), ScriptedTester::passing());
    let err = orchestrator(&fx, &store)
        .resume(&RunId::from("r4"))
        .err()
        .unwrap();
    assert!(matches!(err, PipelineError::CheckpointCorrupt { .. }));
    assert_eq!(
        store.get(&RunId::from("r4")).unwrap().unwrap().status,
        RunStatus::Failed
    );
    assert_eq!(fx.test_calls(), 0);
}

#[tokio::test]
async fn resume_of_finished_run_returns_its_state() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    seed(&store, &generated_state("r5", Phase::Done));

    let fx = Fixture::new(plan(), ScriptedGenerator::default(), ScriptedTester::passing());
    let state = orchestrator(&fx, &store)
        .resume(&RunId::from("r5"))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(state.phase, Phase::Done);
    assert_eq!(fx.test_calls(), 0);
    assert!(fx.sink.events().is_empty());
}

#[tokio::test]
async fn recover_resumes_unfinished_runs_and_fails_unusable_ones() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    seed(&store, &generated_state("live", Phase::Testing));
    seed(&store, &generated_state("finished", Phase::Done));
    let orphan = generated_state("orphan", Phase::Generating);
    store
        .put(&RunRecord::from_state(&orphan, chrono::Utc::now()))
        .unwrap();

    let fx = Fixture::new(plan(), ScriptedGenerator::default(), ScriptedTester::passing());
    let orchestrator = orchestrator(&fx, &store);
    let report = orchestrator.recover().unwrap();

    assert_eq!(report.resumed.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, RunId::from("orphan"));

    for handle in report.resumed {
        assert_eq!(handle.run_id(), &RunId::from("live"));
        assert_eq!(handle.wait().await.unwrap().phase, Phase::Done);
    }
    assert_eq!(orchestrator.status(&RunId::from("live")).unwrap().status, RunStatus::Done);
    assert_eq!(orchestrator.status(&RunId::from("orphan")).unwrap().status, RunStatus::Failed);
    assert_eq!(orchestrator.status(&RunId::from("finished")).unwrap().status, RunStatus::Done);
    assert!(fx.generator.started().is_empty());
}

#[tokio::test]
async fn recover_reconciles_record_left_behind_a_finished_checkpoint() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    // The process died after the final checkpoint but before the record write.
    store
        .save(&Checkpoint::new(&generated_state("late", Phase::Done)))
        .unwrap();
    store
        .put(&RunRecord::from_state(
            &generated_state("late", Phase::Testing),
            chrono::Utc::now(),
        ))
        .unwrap();

    let fx = Fixture::new(plan(), ScriptedGenerator::default(), ScriptedTester::passing());
    let orchestrator = orchestrator(&fx, &store);

    let first = orchestrator.recover().unwrap();
    assert!(first.resumed.is_empty());
    assert!(first.failed.is_empty());
    assert_eq!(orchestrator.status(&RunId::from("late")).unwrap().status, RunStatus::Done);

    let second = orchestrator.recover().unwrap();
    assert!(second.resumed.is_empty());
    assert!(second.failed.is_empty());
    assert_eq!(fx.test_calls(), 0);
}

#[tokio::test]
async fn direct_resume_of_finished_checkpoint_fixes_stale_record() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    store
        .save(&Checkpoint::new(&generated_state("stale", Phase::Done)))
        .unwrap();
    store
        .put(&RunRecord::from_state(
            &generated_state("stale", Phase::Testing),
            chrono::Utc::now(),
        ))
        .unwrap();

    let fx = Fixture::new(plan(), ScriptedGenerator::default(), ScriptedTester::passing());
    let orchestrator = orchestrator(&fx, &store);
    let state = orchestrator
        .resume(&RunId::from("stale"))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(state.phase, Phase::Done);
    assert_eq!(orchestrator.status(&RunId::from("stale")).unwrap().status, RunStatus::Done);
}

#[tokio::test]
async fn recover_skips_unreadable_record_and_resumes_the_rest() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    seed(&store, &generated_state("good", Phase::Testing));
    store
        .put_raw_record(&RunId::from("broken"), b"garbage")
        .unwrap();

    let fx = Fixture::new(plan(), ScriptedGenerator::default(), ScriptedTester::passing());
    let orchestrator = orchestrator(&fx, &store);
    let report = orchestrator.recover().unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, RunId::from("broken"));
    assert_eq!(report.resumed.len(), 1);
    for handle in report.resumed {
        assert_eq!(handle.run_id(), &RunId::from("good"));
        assert_eq!(handle.wait().await.unwrap().phase, Phase::Done);
    }

    let listed: Vec<RunId> = orchestrator
        .list()
        .unwrap()
        .into_iter()
        .map(|record| record.run_id)
        .collect();
    assert_eq!(listed, vec![RunId::from("good")]);
}

#[tokio::test]
async fn recover_picks_up_checkpoint_without_record() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    store
        .save(&Checkpoint::new(&generated_state("unrecorded", Phase::Testing)))
        .unwrap();

    let fx = Fixture::new(plan(), ScriptedGenerator::default(), ScriptedTester::passing());
    let orchestrator = orchestrator(&fx, &store);
    let report = orchestrator.recover().unwrap();

    assert!(report.failed.is_empty());
    assert_eq!(report.resumed.len(), 1);
    for handle in report.resumed {
        assert_eq!(handle.wait().await.unwrap().phase, Phase::Done);
    }
    assert_eq!(
        orchestrator.status(&RunId::from("unrecorded")).unwrap().status,
        RunStatus::Done
    );
}

#[tokio::test]
async fn completed_run_is_replayable_from_persisted_events() {
    let dir = TempDir::new().unwrap();
    let db = sled::open(dir.path().join("db")).unwrap();
    let store = SledStore::shared(db.clone()).unwrap();
    let events = EventStore::shared(db).unwrap();
    let (bus, queue) = EventBus::with_persistence(EventBus::DEFAULT_CAPACITY);
    let ingestor = tokio::spawn(EventIngestor::new(events.clone(), queue).run());

    let fx = Fixture::new(plan(), ScriptedGenerator::default(), ScriptedTester::passing());
    let orchestrator = Orchestrator::builder(fx.agents())
        .checkpoints(store.clone())
        .runs(store.clone())
        .events(Arc::new(bus))
        .build();
    let state = orchestrator
        .start(foundry::pipeline::RunRequest::new("t", "d", "cli"))
        .unwrap()
        .wait()
        .await
        .unwrap();
    drop(orchestrator);
    ingestor.await.unwrap();

    let recorded = events.read_events(&state.run_id).unwrap();
    let seqs: Vec<u64> = recorded.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (1..=recorded.len() as u64).collect::<Vec<_>>());
    assert_eq!(recorded.first().unwrap().event.kind, "run_started");
    assert_eq!(recorded.last().unwrap().event.kind, "run_finished");

    let tail = events.read_events_after(&state.run_id, 2).unwrap();
    assert_eq!(tail.len(), recorded.len() - 2);
    assert_eq!(tail[0].seq, 3);
}
