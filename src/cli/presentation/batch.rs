//! Batch presentation: run results and discovered problems.

use super::to_json;
use crate::error::PipelineError;
use crate::pipeline::{RunReport, StageState};
use crate::problem::Problem;
use crate::scheduler::BatchReport;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use owo_colors::OwoColorize;
use serde_json::json;

fn result_label(report: &RunReport) -> String {
    if report.succeeded() {
        "completed".to_string()
    } else {
        "failed".to_string()
    }
}

fn degraded_stages(report: &RunReport) -> Vec<String> {
    report
        .sub_problems
        .iter()
        .flat_map(|sp| {
            sp.stages
                .iter()
                .filter(|r| r.state == StageState::Degraded)
                .map(move |r| format!("{}:{}", sp.id, r.stage))
        })
        .collect()
}

pub fn format_batch_report(report: &BatchReport, format: &str) -> Result<String, PipelineError> {
    if format == "json" {
        return to_json(report);
    }

    if report.outcomes.is_empty() {
        return Ok(format!(
            "No problems selected ({} discovered under {}).",
            report.discovered,
            report.workspace.display()
        ));
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        "Problem",
        "Result",
        "Sub-problems",
        "Stages run",
        "Deliverable",
        "Notes",
    ]);
    for outcome in &report.outcomes {
        let finished = outcome.sub_problems.iter().filter(|sp| sp.succeeded()).count();
        let deliverable = outcome
            .deliverable
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        let mut notes = Vec::new();
        if let Some(error) = &outcome.error {
            notes.push(error.clone());
        }
        let degraded = degraded_stages(outcome);
        if !degraded.is_empty() {
            notes.push(format!("degraded: {}", degraded.join(", ")));
        }
        table.add_row(vec![
            outcome.problem_id.clone(),
            result_label(outcome),
            format!("{}/{}", finished, outcome.sub_problems.len()),
            outcome.executed_stages().to_string(),
            deliverable,
            notes.join("; "),
        ]);
    }

    let seconds = report.duration().num_milliseconds() as f64 / 1000.0;
    let completed = format!("{} completed", report.completed());
    let failed = format!("{} failed", report.failed());
    let summary = if report.failed() == 0 {
        format!("{}, {} in {:.1}s", completed.green(), failed, seconds)
    } else {
        format!("{}, {} in {:.1}s", completed, failed.red(), seconds)
    };
    Ok(format!("{}\n{}", table, summary))
}

pub fn format_discovered(problems: &[Problem], format: &str) -> Result<String, PipelineError> {
    if format == "json" {
        let rows: Vec<_> = problems
            .iter()
            .map(|p| {
                json!({
                    "id": p.id,
                    "numeric_id": p.numeric_id,
                    "path": p.path,
                    "bytes": p.text.len(),
                })
            })
            .collect();
        return to_json(&rows);
    }

    if problems.is_empty() {
        return Ok("No problems found.".to_string());
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["#", "Problem", "Path", "Bytes"]);
    for p in problems {
        let number = p
            .numeric_id
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            number,
            p.id.clone(),
            p.path.display().to_string(),
            p.text.len().to_string(),
        ]);
    }
    Ok(format!("{}\n{} problem(s)", table, problems.len()))
}
