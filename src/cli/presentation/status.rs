//! Status presentation: stored stage progress per problem.

use super::to_json;
use crate::error::PipelineError;
use crate::pipeline::status::ProblemStatus;
use crate::pipeline::{Stage, StageState};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;

fn stage_mark(state: StageState) -> &'static str {
    match state {
        StageState::Succeeded | StageState::Skipped => "done",
        StageState::Degraded => "degraded",
        StageState::FailedRecoverable => "partial",
        StageState::FailedFatal => "failed",
        StageState::Pending | StageState::Running => "-",
    }
}

pub fn format_status(statuses: &[ProblemStatus], format: &str) -> Result<String, PipelineError> {
    if format == "json" {
        return to_json(statuses);
    }
    if statuses.is_empty() {
        return Ok("No problems found.".to_string());
    }

    let mut out = String::new();
    for status in statuses {
        let (done, total) = status.progress();
        let headline = format!(
            "{}  decompose: {}  stages: {}/{}  deliverable: {}",
            status.problem_id,
            stage_mark(status.decompose),
            done,
            total,
            if status.has_deliverable { "yes" } else { "no" }
        );
        out.push_str(&format!("{}\n", headline.bold()));

        if !status.sub_problems.is_empty() {
            let mut table = Table::new();
            table.load_preset(UTF8_BORDERS_ONLY);
            let mut header = vec!["Sub-problem".to_string()];
            header.extend(Stage::SUB_PROBLEM_STAGES.iter().map(|s| s.to_string()));
            table.set_header(header);
            for sp in &status.sub_problems {
                let mut row = vec![sp.id.clone()];
                row.extend(sp.stages.iter().map(|(_, state)| stage_mark(*state).to_string()));
                table.add_row(row);
            }
            out.push_str(&format!("{}\n", table));
        }

        if let Some(run) = &status.last_run {
            out.push_str(&format!(
                "last run: {} at {}\n",
                run.lifecycle,
                run.finished_at.to_rfc3339()
            ));
        }
        out.push('\n');
    }
    Ok(out.trim_end().to_string())
}
