//! Merge rules: built-in defaults, lowest precedence layer.

use config::builder::DefaultState;
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

use crate::config::default_data_dir;

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let data_dir = default_data_dir();
    Config::builder()
        .set_default("pipeline.max_retries", 2i64)?
        .set_default("pipeline.enable_research", true)?
        .set_default("pipeline.llm_concurrency", 10i64)?
        .set_default("pipeline.stop_grace_ms", 2000i64)?
        .set_default("retry.backoff_secs", vec![10i64, 20, 40])?
        .set_default("retry.timeout_retries", 1i64)?
        .set_default("timeouts.plan_secs", 180i64)?
        .set_default("timeouts.research_secs", 15i64)?
        .set_default("timeouts.generate_secs", 120i64)?
        .set_default("timeouts.test_secs", 120i64)?
        .set_default("timeouts.correct_secs", 180i64)?
        .set_default("storage.data_dir", data_dir.to_string_lossy().to_string())
}
