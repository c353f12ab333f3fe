//! CLI presentation: text and json formatters per command family.

mod batch;
mod status;

pub use batch::{format_batch_report, format_discovered};
pub use status::format_status;

use crate::error::PipelineError;
use serde::Serialize;

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, PipelineError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| PipelineError::Config(format!("Failed to render JSON output: {}", e)))
}
