//! Shared test utilities for integration tests
//!
//! Provides workspace fixtures plus XDG isolation for tests that touch the global
//! configuration file.

use solvent::config::SolventConfig;
use solvent::provider::GenerationClient;
use solvent::scheduler::BatchScheduler;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Global mutex to serialize XDG environment variable access across all tests
static XDG_ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Environment variable state to restore after test
struct EnvState {
    home: Option<String>,
    xdg_config_home: Option<String>,
}

impl EnvState {
    fn capture() -> Self {
        Self {
            home: std::env::var("HOME").ok(),
            xdg_config_home: std::env::var("XDG_CONFIG_HOME").ok(),
        }
    }

    fn restore(self) {
        match self.home {
            Some(orig) => std::env::set_var("HOME", orig),
            None => std::env::remove_var("HOME"),
        }
        match self.xdg_config_home {
            Some(orig) => std::env::set_var("XDG_CONFIG_HOME", orig),
            None => std::env::remove_var("XDG_CONFIG_HOME"),
        }
    }
}

/// Run `f` with XDG_CONFIG_HOME and HOME pointing into `test_dir`.
///
/// The global config file then lives at `<test_dir>/solvent/config.toml`.
pub fn with_xdg_env<F, R>(test_dir: &TempDir, f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = XDG_ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let env_state = EnvState::capture();

    let test_home = test_dir.path().join("home");
    std::fs::create_dir_all(&test_home).unwrap();
    std::env::set_var("HOME", test_home.to_str().unwrap());
    std::env::set_var("XDG_CONFIG_HOME", test_dir.path().to_str().unwrap());

    let result = f();

    env_state.restore();

    result
}

/// Create `problems/<id>/problem.md` under `workspace`.
pub fn write_problem(workspace: &Path, id: &str, text: &str) {
    let dir = workspace.join("problems").join(id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("problem.md"), text).unwrap();
}

/// Scheduler over `workspace` with default configuration.
pub fn scheduler(workspace: &Path, client: Arc<dyn GenerationClient>) -> BatchScheduler {
    BatchScheduler::new(workspace, SolventConfig::default(), client).unwrap()
}
