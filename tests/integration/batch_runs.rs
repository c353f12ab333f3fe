//! End-to-end batch runs against the offline generator.

use crate::integration::test_utils::{scheduler, write_problem};
use solvent::artifact::{deliverable_name, ArtifactKey, OUTPUT};
use solvent::error::GenerationError;
use solvent::pipeline::{RerunPolicy, Stage, StageState};
use solvent::problem::ProblemLifecycle;
use solvent::provider::ScriptedClient;
use solvent::scheduler::BatchOptions;
use std::sync::Arc;
use tempfile::TempDir;

const LABELED: &str = "Study of river temperature.\n\n\
Q1. Describe the seasonal temperature cycle.\n\
Q2. Explain what drives the summer maximum.\n\
Q3. Predict the effect of a new upstream dam.\n";

#[tokio::test]
async fn test_labeled_problem_produces_one_sub_problem_per_label() {
    let ws = TempDir::new().unwrap();
    write_problem(ws.path(), "01_river", LABELED);

    let client = Arc::new(ScriptedClient::offline());
    let sched = scheduler(ws.path(), client.clone());
    let report = sched.run(&BatchOptions::default()).await.unwrap();

    assert_eq!(report.discovered, 1);
    assert_eq!(report.completed(), 1);
    let outcome = &report.outcomes[0];
    let ids: Vec<_> = outcome.sub_problems.iter().map(|sp| sp.id.as_str()).collect();
    assert_eq!(ids, vec!["SUB_01", "SUB_02", "SUB_03"]);
    for sp in &outcome.sub_problems {
        for stage in Stage::SUB_PROBLEM_STAGES {
            assert!(sp.state_of(stage).unwrap().unblocks_successors());
        }
    }
    assert_eq!(client.calls_for("draft").len(), 3);

    let deliverable = std::fs::read_to_string(outcome.deliverable.as_ref().unwrap()).unwrap();
    assert_eq!(deliverable.matches("## Final Review").count(), 3);
    assert_eq!(deliverable.matches("\n---\n").count(), 2);
    assert!(ws
        .path()
        .join("outputs/01_river")
        .join(deliverable_name("01_river"))
        .is_file());
}

#[tokio::test]
async fn test_unlabeled_problem_is_atomic() {
    let ws = TempDir::new().unwrap();
    write_problem(ws.path(), "02_sky", "Explain why the sky is blue at noon.");

    let sched = scheduler(ws.path(), Arc::new(ScriptedClient::offline()));
    let report = sched.run(&BatchOptions::default()).await.unwrap();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.lifecycle, ProblemLifecycle::Completed);
    assert_eq!(outcome.sub_problems.len(), 1);
    assert_eq!(outcome.sub_problems[0].id, "ATOMIC");
    assert!(sched
        .store()
        .exists(&ArtifactKey::sub_problem("02_sky", "ATOMIC", Stage::Assemble, OUTPUT))
        .unwrap());
}

#[tokio::test]
async fn test_second_run_reuses_every_artifact() {
    let ws = TempDir::new().unwrap();
    write_problem(ws.path(), "01_river", LABELED);
    write_problem(ws.path(), "02_sky", "Explain why the sky is blue at noon.");

    let first = scheduler(ws.path(), Arc::new(ScriptedClient::offline()))
        .run(&BatchOptions::default())
        .await
        .unwrap();
    assert_eq!(first.completed(), 2);

    let client = Arc::new(ScriptedClient::offline());
    let second = scheduler(ws.path(), client.clone())
        .run(&BatchOptions::default())
        .await
        .unwrap();

    assert_eq!(second.completed(), 2);
    assert!(client.calls().is_empty(), "{:?}", client.calls());
    for (a, b) in first.outcomes.iter().zip(&second.outcomes) {
        assert_eq!(b.executed_stages(), 0);
        assert_eq!(a.deliverable_blake3, b.deliverable_blake3);
        for sp in &b.sub_problems {
            assert_eq!(sp.state_of(Stage::Draft), Some(StageState::Skipped));
        }
    }
}

#[tokio::test]
async fn test_force_reruns_every_stage() {
    let ws = TempDir::new().unwrap();
    write_problem(ws.path(), "02_sky", "Explain why the sky is blue at noon.");
    scheduler(ws.path(), Arc::new(ScriptedClient::offline()))
        .run(&BatchOptions::default())
        .await
        .unwrap();

    let client = Arc::new(ScriptedClient::offline());
    let options = BatchOptions {
        rerun: RerunPolicy::Force,
        ..BatchOptions::default()
    };
    let report = scheduler(ws.path(), client.clone()).run(&options).await.unwrap();
    assert_eq!(report.completed(), 1);
    assert_eq!(client.calls_for("decompose").len(), 1);
    assert_eq!(client.calls_for("assemble").len(), 1);
}

#[tokio::test]
async fn test_fatal_failure_is_isolated_to_its_problem() {
    let ws = TempDir::new().unwrap();
    write_problem(ws.path(), "01_alpha", "Explain alpha particles.");
    write_problem(ws.path(), "02_beta", "Explain beta decay.");

    let client = ScriptedClient::new()
        .fail_when(
            "draft",
            "beta decay",
            GenerationError::Fatal("content policy refusal".into()),
        )
        .with_offline_rules();
    let sched = scheduler(ws.path(), Arc::new(client));
    let options = BatchOptions {
        concurrency: Some(2),
        ..BatchOptions::default()
    };
    let report = sched.run(&options).await.unwrap();

    assert_eq!(report.completed(), 1);
    assert_eq!(report.failed(), 1);
    let alpha = &report.outcomes[0];
    let beta = &report.outcomes[1];
    assert_eq!(alpha.problem_id, "01_alpha");
    assert_eq!(alpha.lifecycle, ProblemLifecycle::Completed);
    assert_eq!(beta.lifecycle, ProblemLifecycle::Failed);
    assert!(beta.deliverable.is_none());

    let store = sched.store();
    assert!(store
        .exists(&ArtifactKey::problem(
            "02_beta",
            Stage::Decompose,
            Stage::Decompose.output_artifact()
        ))
        .unwrap());
    for stage in [Stage::Search, Stage::DataAnalysis] {
        let key = ArtifactKey::sub_problem("02_beta", "ATOMIC", stage, stage.output_artifact());
        assert!(store.exists(&key).unwrap(), "missing {}", stage);
    }
    assert!(!store
        .exists(&ArtifactKey::sub_problem("02_beta", "ATOMIC", Stage::Draft, OUTPUT))
        .unwrap());
    assert_eq!(
        beta.sub_problems[0].state_of(Stage::Draft),
        Some(StageState::FailedFatal)
    );
}

#[tokio::test]
async fn test_include_filter_selects_by_number() {
    let ws = TempDir::new().unwrap();
    write_problem(ws.path(), "01_alpha", "Explain alpha particles.");
    write_problem(ws.path(), "02_beta", "Explain beta decay.");

    let options = BatchOptions {
        include: vec!["2".into()],
        ..BatchOptions::default()
    };
    let report = scheduler(ws.path(), Arc::new(ScriptedClient::offline()))
        .run(&options)
        .await
        .unwrap();
    assert_eq!(report.discovered, 2);
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].problem_id, "02_beta");
}
