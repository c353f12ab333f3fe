//! CLI parsing and routing through the public surface.

use crate::integration::test_utils::{with_xdg_env, write_problem};
use clap::Parser;
use solvent::cli::{Cli, Commands, RunContext};
use solvent::pipeline::Stage;
use tempfile::TempDir;

#[test]
fn test_run_flags_parse() {
    let cli = Cli::try_parse_from([
        "solvent",
        "run",
        "--include",
        "1,03_flow",
        "--include",
        "problems/07_x",
        "--concurrency",
        "3",
        "--from-stage",
        "final-review",
        "--offline",
    ])
    .unwrap();

    match cli.command {
        Commands::Run {
            include,
            concurrency,
            force,
            from_stage,
            offline,
            format,
            ..
        } => {
            assert_eq!(include, vec!["1", "03_flow", "problems/07_x"]);
            assert_eq!(concurrency, Some(3));
            assert!(!force);
            assert_eq!(from_stage, Some(Stage::FinalReview));
            assert!(offline);
            assert_eq!(format, "text");
        }
        other => panic!("unexpected command: {:?}", other),
    }
}

#[test]
fn test_invalid_combinations_are_rejected() {
    assert!(Cli::try_parse_from(["solvent", "run", "--force", "--from-stage", "draft"]).is_err());
    assert!(Cli::try_parse_from(["solvent", "run", "--from-stage", "polish"]).is_err());
    assert!(Cli::try_parse_from(["solvent", "--quiet", "--verbose", "status"]).is_err());
}

#[test]
fn test_global_flags_follow_subcommand() {
    let cli = Cli::try_parse_from(["solvent", "status", "--workspace", "/tmp/ws", "--verbose"]).unwrap();
    assert_eq!(cli.workspace, std::path::PathBuf::from("/tmp/ws"));
    assert!(cli.verbose);
    assert!(matches!(cli.command, Commands::Status { .. }));
}

#[test]
fn test_offline_run_then_status_via_route_table() {
    let xdg = TempDir::new().unwrap();
    let ws = TempDir::new().unwrap();
    write_problem(ws.path(), "01_alpha", "Explain alpha particles.");
    write_problem(ws.path(), "02_beta", "Q1. Define beta decay.\nQ2. Give an example.\n");

    with_xdg_env(&xdg, || {
        let ws_arg = ws.path().to_string_lossy().to_string();
        let ctx = RunContext::new(ws.path().to_path_buf(), None).unwrap();

        let run = Cli::try_parse_from(["solvent", "--workspace", &ws_arg, "run", "--offline"]).unwrap();
        let output = ctx.execute(&run.command).unwrap();
        assert!(output.contains("01_alpha"));
        assert!(output.contains("2 completed"));

        let status =
            Cli::try_parse_from(["solvent", "status", "--format", "json", "--include", "2"]).unwrap();
        let output = ctx.execute(&status.command).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        let entries = parsed.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["problem_id"], "02_beta");
        assert_eq!(entries[0]["has_deliverable"], true);
        assert_eq!(entries[0]["sub_problems"].as_array().unwrap().len(), 2);

        let config = Cli::try_parse_from(["solvent", "config"]).unwrap();
        assert!(ctx.execute(&config.command).unwrap().contains("[scheduler]"));
    });
}
