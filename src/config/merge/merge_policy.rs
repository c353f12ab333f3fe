//! Merge rules: defaults, override order, conflict handling.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
///
/// Later sources override earlier ones key by key: global file, workspace
/// `config/config.toml`, `config/{SOLVENT_ENV}.toml`, then the environment.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("provider.provider_type", "openrouter")?
        .set_default("provider.api_key_env", "OPENROUTER_API_KEY")?
        .set_default("retry.max_attempts", 5_i64)?
        .set_default("retry.base_delay_ms", 1000_i64)?
        .set_default("retry.backoff_factor", 2.0_f64)?
        .set_default("retry.max_delay_ms", 60_000_i64)?
        .set_default("retry.attempt_timeout_secs", 120_i64)?
        .set_default("scheduler.problem_pattern", "problems/*/problem.md")?
        .set_default("scheduler.max_concurrency", 4_i64)?
        .set_default("scheduler.sub_problem_concurrency", 1_i64)?
        .set_default("paths.output_root", "outputs")
}
