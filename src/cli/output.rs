//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::PipelineError;

/// Map domain errors to a single line for CLI output.
pub fn map_error(e: &PipelineError) -> String {
    match e {
        PipelineError::Config(msg) => format!("Configuration error: {}", msg),
        PipelineError::Discovery(msg) => format!("Discovery error: {}", msg),
        other => format!("Error: {}", other),
    }
}
