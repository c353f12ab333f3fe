//! CLI parse: clap types for Solvent. No behavior; definitions only.

use crate::pipeline::Stage;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Solvent CLI - staged, resumable problem-solving pipeline
#[derive(Parser, Debug)]
#[command(name = "solvent", version)]
#[command(about = "Decompose research problems and answer them through a resumable stage pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".", global = true)]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Disable logging
    #[arg(long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long, global = true)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline for every discovered problem
    Run {
        /// Problem file pattern relative to the workspace (overrides configuration)
        #[arg(long)]
        pattern: Option<String>,
        /// Only run these problems (numeric id, name or path); repeatable or comma-separated
        #[arg(long, value_delimiter = ',')]
        include: Vec<String>,
        /// Problems executed concurrently (overrides configuration)
        #[arg(long)]
        concurrency: Option<usize>,
        /// Re-execute every stage, replacing stored artifacts
        #[arg(long, conflicts_with = "from_stage")]
        force: bool,
        /// Re-execute this stage and everything downstream of it
        #[arg(long)]
        from_stage: Option<Stage>,
        /// Use the built-in offline generator instead of the remote service
        #[arg(long)]
        offline: bool,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// List the problems a run would pick up
    Discover {
        #[arg(long)]
        pattern: Option<String>,
        #[arg(long, value_delimiter = ',')]
        include: Vec<String>,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show stored stage progress per problem
    Status {
        #[arg(long)]
        pattern: Option<String>,
        #[arg(long, value_delimiter = ',')]
        include: Vec<String>,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Print the effective configuration as TOML
    Config,
}
