//! Integration tests for the Solvent problem-solving pipeline

mod batch_runs;
mod cli_parsing;
mod config_integration;
mod data_analysis;
mod references;
mod retry_backoff;
mod test_utils;
