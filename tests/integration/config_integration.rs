//! Integration tests for layered configuration loading

use crate::integration::test_utils::with_xdg_env;
use solvent::config::{global_config_path, ConfigLoader};
use solvent::pipeline::Stage;
use std::path::PathBuf;
use tempfile::TempDir;

fn write(path: PathBuf, contents: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

#[test]
fn test_workspace_file_overrides_global_file() {
    let xdg = TempDir::new().unwrap();
    let ws = TempDir::new().unwrap();

    with_xdg_env(&xdg, || {
        let global = global_config_path().unwrap();
        assert_eq!(global, xdg.path().join("solvent").join("config.toml"));
        write(
            global,
            r#"
[provider]
default_model = "global-model"

[scheduler]
max_concurrency = 2
sub_problem_concurrency = 3
"#,
        );
        write(
            ws.path().join("config").join("config.toml"),
            r#"
[scheduler]
max_concurrency = 6

[models]
draft = "drafting-model"
"#,
        );

        let config = ConfigLoader::load(ws.path()).unwrap();
        assert_eq!(config.provider.default_model, "global-model");
        assert_eq!(config.scheduler.max_concurrency, 6);
        assert_eq!(config.scheduler.sub_problem_concurrency, 3);
        assert_eq!(config.models.model_for(Stage::Draft, "global-model"), "drafting-model");
        assert_eq!(config.models.model_for(Stage::Search, "global-model"), "global-model");
        assert!(config.validate().is_ok());
    });
}

#[test]
fn test_environment_overrides_files() {
    let xdg = TempDir::new().unwrap();
    let ws = TempDir::new().unwrap();

    with_xdg_env(&xdg, || {
        write(
            ws.path().join("config").join("config.toml"),
            "[retry]\nmax_attempts = 3\n",
        );
        std::env::set_var("SOLVENT__RETRY__MAX_ATTEMPTS", "7");
        let loaded = ConfigLoader::load(ws.path());
        std::env::remove_var("SOLVENT__RETRY__MAX_ATTEMPTS");

        assert_eq!(loaded.unwrap().retry.max_attempts, 7);
    });
}

#[test]
fn test_explicit_file_and_validation_errors() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("solvent.toml");
    std::fs::write(
        &file,
        r#"
[provider]
provider_type = "custom"
default_model = "local"

[models]
temperature = 3.5

[scheduler]
problem_pattern = "problems/[/problem.md"
"#,
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&file).unwrap();
    let errors = config.validate().unwrap_err();
    let sections: Vec<_> = errors.iter().map(|e| e.section).collect();
    assert!(sections.contains(&"provider"));
    assert!(sections.contains(&"models"));
    assert!(sections.contains(&"scheduler"));

    assert!(ConfigLoader::load_from_file(&dir.path().join("missing.toml")).is_err());
}

#[test]
fn test_effective_config_round_trips_through_toml() {
    let xdg = TempDir::new().unwrap();
    let ws = TempDir::new().unwrap();
    with_xdg_env(&xdg, || {
        let config = ConfigLoader::load(ws.path()).unwrap();
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("problem_pattern = \"problems/*/problem.md\""));
        let file = ws.path().join("effective.toml");
        std::fs::write(&file, rendered).unwrap();
        let reloaded = ConfigLoader::load_from_file(&file).unwrap();
        assert_eq!(reloaded.scheduler.max_concurrency, config.scheduler.max_concurrency);
        assert_eq!(reloaded.retry, config.retry);
    });
}
