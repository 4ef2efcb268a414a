//! Workspace config files: `config/config.toml`, then `config/{FOUNDRY_ENV}.toml`.

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, File};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ENV_NAME: &str = "FOUNDRY_ENV";
const DEFAULT_ENV: &str = "development";

/// Workspace config files that apply, lowest precedence first. Missing files are skipped.
pub fn workspace_config_paths(workspace_root: &Path) -> Vec<PathBuf> {
    let config_dir = workspace_root.join("config");
    let env_name = std::env::var(ENV_NAME)
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ENV.to_string());

    [
        config_dir.join("config.toml"),
        config_dir.join(format!("{}.toml", env_name)),
    ]
    .into_iter()
    .filter(|path| path.is_file())
    .collect()
}

pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    workspace_root: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let paths = workspace_config_paths(workspace_root);
    if paths.is_empty() {
        debug!(workspace = %workspace_root.display(), "No workspace configuration files");
    }
    Ok(paths.iter().fold(builder, |builder, path| {
        builder.add_source(File::from(path.as_path()).required(false))
    }))
}
