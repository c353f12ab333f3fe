//! DataAnalysis stage behavior inside full runs.

use crate::integration::test_utils::{scheduler, write_problem};
use serde_json::json;
use solvent::artifact::ArtifactKey;
use solvent::error::GenerationError;
use solvent::pipeline::analysis::{ANALYSIS_PLAN, FILE_PROFILES, RESOLUTION_SUMMARY};
use solvent::pipeline::{Stage, StageState};
use solvent::provider::ScriptedClient;
use solvent::scheduler::BatchOptions;
use std::sync::Arc;
use tempfile::TempDir;

const PROBLEM: &str = "Using the attached measurements.csv, report the mean flow rate.";

fn decomposition_reply() -> String {
    json!({
        "problem_id": "x",
        "main_problem_definition": "Mean flow rate from measurements.csv",
        "sub_problems": [{
            "id": "SUB_01",
            "title": "Mean flow",
            "description": "Compute the mean flow rate recorded in measurements.csv.",
            "suggested_approach": "Average the flow column.",
            "data_flag": 1,
            "data_list": ["measurements.csv", "GEO"]
        }]
    })
    .to_string()
}

fn workspace() -> TempDir {
    let ws = TempDir::new().unwrap();
    write_problem(ws.path(), "03_flow", PROBLEM);
    std::fs::write(
        ws.path().join("problems/03_flow/measurements.csv"),
        "day,flow\n1,3.2\n2,3.8\n",
    )
    .unwrap();
    ws
}

fn key(stage: Stage, name: &str) -> ArtifactKey {
    ArtifactKey::sub_problem("03_flow", "ATOMIC", stage, name)
}

#[tokio::test]
async fn test_data_files_are_profiled_and_summarized() {
    let ws = workspace();
    let client = Arc::new(
        ScriptedClient::new()
            .reply("decompose", decomposition_reply())
            .reply("data_extraction", "measurements.csv")
            .reply("data_analysis", "Flow averages 3.5 across two days.")
            .with_offline_rules(),
    );
    let sched = scheduler(ws.path(), client.clone());
    let report = sched.run(&BatchOptions::default()).await.unwrap();

    let outcome = &report.outcomes[0];
    assert!(outcome.succeeded(), "{:?}", outcome.error);
    let sp = &outcome.sub_problems[0];
    assert_eq!(sp.id, "ATOMIC");
    assert_eq!(sp.state_of(Stage::DataAnalysis), Some(StageState::Succeeded));

    let store = sched.store();
    let profiles = store.read(&key(Stage::DataAnalysis, FILE_PROFILES)).unwrap();
    assert!(profiles.contains("measurements.csv"));
    let summary = store.read(&key(Stage::DataAnalysis, RESOLUTION_SUMMARY)).unwrap();
    assert!(summary.contains("measurements.csv"));
    let plan = store.read(&key(Stage::DataAnalysis, ANALYSIS_PLAN)).unwrap();
    assert!(plan.starts_with("# Analysis Plan"));
    assert_eq!(client.calls_for("data_plan").len(), 1);

    let summarize = client.calls_for("data_analysis");
    assert_eq!(summarize.len(), 1);
    assert!(summarize[0].user.contains("flow"));
    let drafts = client.calls_for("draft");
    assert!(drafts[0].user.contains("Flow averages 3.5 across two days."));
}

#[tokio::test]
async fn test_failed_summary_degrades_and_draft_proceeds() {
    let ws = workspace();
    let client = Arc::new(
        ScriptedClient::new()
            .reply("decompose", decomposition_reply())
            .reply("data_extraction", "measurements.csv")
            .fail("data_analysis", GenerationError::Fatal("model unavailable".into()))
            .with_offline_rules(),
    );
    let sched = scheduler(ws.path(), client.clone());
    let report = sched.run(&BatchOptions::default()).await.unwrap();

    let outcome = &report.outcomes[0];
    assert!(outcome.succeeded(), "{:?}", outcome.error);
    let sp = &outcome.sub_problems[0];
    assert_eq!(sp.state_of(Stage::DataAnalysis), Some(StageState::Degraded));
    assert_eq!(sp.state_of(Stage::Draft), Some(StageState::Succeeded));

    let results = sched
        .store()
        .read(&key(Stage::DataAnalysis, Stage::DataAnalysis.output_artifact()))
        .unwrap();
    assert!(results.contains("Automated summary unavailable"));
    assert!(results.contains("measurements.csv"));
    assert!(client.calls_for("draft")[0]
        .user
        .contains("Automated summary unavailable"));
}

#[tokio::test]
async fn test_sub_problem_without_data_skips_resolution() {
    let ws = TempDir::new().unwrap();
    write_problem(ws.path(), "04_plain", "Explain the greenhouse effect.");
    let client = Arc::new(ScriptedClient::offline());
    let sched = scheduler(ws.path(), client.clone());
    let report = sched.run(&BatchOptions::default()).await.unwrap();

    assert!(report.outcomes[0].succeeded());
    assert!(client.calls_for("data_extraction").is_empty());
    assert!(client.calls_for("data_analysis").is_empty());
    let results = sched
        .store()
        .read(&ArtifactKey::sub_problem(
            "04_plain",
            "ATOMIC",
            Stage::DataAnalysis,
            Stage::DataAnalysis.output_artifact(),
        ))
        .unwrap();
    assert!(results.contains("No data required"));
}

#[tokio::test]
async fn test_failed_extraction_is_reported_as_resolution_degraded() {
    let ws = workspace();
    let client = Arc::new(
        ScriptedClient::new()
            .reply("decompose", decomposition_reply())
            .fail("data_extraction", GenerationError::Fatal("extractor down".into()))
            .reply("data_analysis", "Flow averages 3.5.")
            .with_offline_rules(),
    );
    let sched = scheduler(ws.path(), client);
    let report = sched.run(&BatchOptions::default()).await.unwrap();

    let outcome = &report.outcomes[0];
    assert!(outcome.succeeded(), "{:?}", outcome.error);
    let record = outcome.sub_problems[0]
        .stages
        .iter()
        .find(|r| r.stage == Stage::DataAnalysis)
        .unwrap();
    assert_eq!(record.state, StageState::Degraded);
    let detail = record.detail.as_deref().unwrap();
    assert!(detail.starts_with("Data resolution degraded: semantic extraction failed"));
    assert!(detail.contains("extractor down"));

    let profiles = sched
        .store()
        .read(&key(Stage::DataAnalysis, FILE_PROFILES))
        .unwrap();
    assert!(profiles.contains("measurements.csv"));
    let stored = sched
        .store()
        .read_problem_file("03_flow", "run_report.json")
        .unwrap()
        .unwrap();
    assert!(stored.contains("Data resolution degraded"));
}

#[tokio::test]
async fn test_flagged_sub_problem_without_named_files_still_resolves() {
    let ws = TempDir::new().unwrap();
    write_problem(ws.path(), "05_plate", "Estimate growth from the attached plate export.");
    std::fs::write(
        ws.path().join("problems/05_plate/plate_export.csv"),
        "well,od\nA1,0.4\n",
    )
    .unwrap();
    let reply = json!({
        "problem_id": "x",
        "main_problem_definition": "Growth from the plate export",
        "sub_problems": [{
            "id": "SUB_01",
            "title": "Growth",
            "description": "Fit growth curves to the plate export.",
            "suggested_approach": "Fit a logistic curve.",
            "data_flag": 1,
            "data_list": []
        }]
    })
    .to_string();
    let client = Arc::new(
        ScriptedClient::new()
            .reply("decompose", reply)
            .reply("data_extraction", "plate_export.csv")
            .with_offline_rules(),
    );
    let sched = scheduler(ws.path(), client.clone());
    let report = sched.run(&BatchOptions::default()).await.unwrap();

    assert!(report.outcomes[0].succeeded());
    assert_eq!(client.calls_for("data_extraction").len(), 1);
    let profiles = sched
        .store()
        .read(&ArtifactKey::sub_problem(
            "05_plate",
            "ATOMIC",
            Stage::DataAnalysis,
            FILE_PROFILES,
        ))
        .unwrap();
    assert!(profiles.contains("plate_export.csv"));
}

#[tokio::test]
async fn test_flat_layout_never_indexes_other_problem_statements() {
    let ws = TempDir::new().unwrap();
    let problems = ws.path().join("problems");
    std::fs::create_dir_all(&problems).unwrap();
    std::fs::write(
        problems.join("01_rates.txt"),
        "Use flow.csv and 02_yields.txt to estimate the rate.",
    )
    .unwrap();
    std::fs::write(problems.join("02_yields.txt"), "Report the yield of each plot.").unwrap();
    std::fs::write(problems.join("flow.csv"), "day,flow\n1,3.2\n").unwrap();

    let reply = json!({
        "problem_id": "x",
        "main_problem_definition": "Rate from flow.csv",
        "sub_problems": [{
            "id": "SUB_01",
            "title": "Rate",
            "description": "Estimate the rate from flow.csv and 02_yields.txt.",
            "suggested_approach": "Regress flow on day.",
            "data_flag": 1,
            "data_list": ["flow.csv", "02_yields.txt"]
        }]
    })
    .to_string();
    let client = Arc::new(
        ScriptedClient::new()
            .reply("decompose", reply)
            .reply("data_extraction", "flow.csv, 02_yields.txt")
            .with_offline_rules(),
    );
    let options = BatchOptions {
        pattern: Some("problems/*.txt".into()),
        include: vec!["1".into()],
        ..BatchOptions::default()
    };
    let sched = scheduler(ws.path(), client);
    let report = sched.run(&options).await.unwrap();

    assert_eq!(report.discovered, 2);
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].problem_id, "01_rates");
    let store = sched.store();
    let data_key = |name: &str| {
        ArtifactKey::sub_problem("01_rates", "ATOMIC", Stage::DataAnalysis, name)
    };
    let profiles = store.read(&data_key(FILE_PROFILES)).unwrap();
    assert!(profiles.contains("flow.csv"));
    assert!(!profiles.contains("02_yields"));
    let summary = store.read(&data_key(RESOLUTION_SUMMARY)).unwrap();
    assert!(summary.contains("## Dropped candidates"));
    assert!(summary.contains("- 02_yields.txt"));
}
