//! Integration tests for layered configuration loading

use crate::integration::test_utils::with_xdg_env;
use foundry::config::{ConfigLoader, FoundryConfig};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn write(path: &Path, contents: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

#[test]
fn defaults_apply_without_any_file() {
    let test_dir = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();
    let config = with_xdg_env(&test_dir, || ConfigLoader::load(workspace.path()).unwrap());

    assert_eq!(config.pipeline.max_retries, 2);
    assert!(config.pipeline.enable_research);
    assert_eq!(config.pipeline.llm_concurrency, 10);
    assert_eq!(config.timeouts.plan_secs, 180);
    assert_eq!(config.timeouts.research_secs, 15);
    assert!(config.validate().is_ok());
}

#[test]
fn workspace_file_overrides_global_file() {
    let test_dir = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();
    write(
        &test_dir.path().join("config-home/foundry/config.toml"),
        r#"
[pipeline]
max_retries = 5
llm_concurrency = 3
"#,
    );
    write(
        &workspace.path().join("config/config.toml"),
        r#"
[pipeline]
max_retries = 1

[timeouts]
generate_secs = 30
"#,
    );

    let config = with_xdg_env(&test_dir, || ConfigLoader::load(workspace.path()).unwrap());
    assert_eq!(config.pipeline.max_retries, 1);
    assert_eq!(config.pipeline.llm_concurrency, 3);
    assert_eq!(config.timeouts.generate_secs, 30);
    assert_eq!(
        config.pipeline_settings().timeouts.generate,
        Duration::from_secs(30)
    );
}

#[test]
fn env_specific_workspace_file_is_layered_last() {
    let test_dir = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();
    write(
        &workspace.path().join("config/config.toml"),
        "[pipeline]\nenable_research = true\nstop_grace_ms = 500\n",
    );
    write(
        &workspace.path().join("config/ci.toml"),
        "[pipeline]\nenable_research = false\n",
    );

    let config = with_xdg_env(&test_dir, || {
        std::env::set_var("FOUNDRY_ENV", "ci");
        ConfigLoader::load(workspace.path()).unwrap()
    });
    assert!(!config.pipeline.enable_research);
    assert_eq!(config.stop_grace(), Duration::from_millis(500));
}

#[test]
fn environment_variables_take_precedence() {
    let test_dir = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();
    write(
        &workspace.path().join("config/config.toml"),
        "[pipeline]\nllm_concurrency = 4\n",
    );

    let config = with_xdg_env(&test_dir, || {
        std::env::set_var("FOUNDRY__PIPELINE__LLM_CONCURRENCY", "7");
        let loaded = ConfigLoader::load(workspace.path());
        std::env::remove_var("FOUNDRY__PIPELINE__LLM_CONCURRENCY");
        loaded.unwrap()
    });
    assert_eq!(config.pipeline.llm_concurrency, 7);
}

#[test]
fn explicit_file_replaces_file_layers() {
    let test_dir = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();
    write(
        &workspace.path().join("config/config.toml"),
        "[pipeline]\nmax_retries = 4\n",
    );
    let explicit = test_dir.path().join("explicit.toml");
    write(
        &explicit,
        r#"
[retry]
timeout_retries = 0

[storage]
data_dir = "/var/lib/foundry"
"#,
    );

    let config = with_xdg_env(&test_dir, || ConfigLoader::load_from_file(&explicit).unwrap());
    assert_eq!(config.pipeline.max_retries, 2);
    assert_eq!(config.retry.timeout_retries, 0);
    assert_eq!(
        config.storage.db_path(),
        Path::new("/var/lib/foundry").join("db")
    );
    assert_eq!(
        config.storage.output_root(),
        Path::new("/var/lib/foundry").join("projects")
    );
}

#[test]
fn invalid_values_are_reported_together() {
    let test_dir = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();
    write(
        &workspace.path().join("config/config.toml"),
        "[pipeline]\nllm_concurrency = 0\n\n[timeouts]\ntest_secs = 0\n",
    );

    let config: FoundryConfig =
        with_xdg_env(&test_dir, || ConfigLoader::load(workspace.path()).unwrap());
    let errors = config.validate().unwrap_err();
    assert_eq!(errors.len(), 2);
}

#[test]
fn missing_explicit_file_is_an_error() {
    let test_dir = TempDir::new().unwrap();
    let missing = test_dir.path().join("absent.toml");
    assert!(with_xdg_env(&test_dir, || ConfigLoader::load_from_file(&missing)).is_err());
}
