//! Config loader facade: assembles the layered sources and deserializes the result.

use std::path::{Path, PathBuf};

use config::ConfigError;
use config::File;

use crate::config::merge::merge_policy;
use crate::config::sources::{environment, global_file, workspace_file};
use crate::config::FoundryConfig;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace.
    ///
    /// Layers, lowest to highest: defaults, global file, workspace `config/config.toml`,
    /// workspace `config/{FOUNDRY_ENV}.toml`, `FOUNDRY__SECTION__KEY` environment variables.
    pub fn load(workspace_root: &Path) -> Result<FoundryConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = environment::add_to_builder(builder);
        builder.build()?.try_deserialize()
    }

    /// Load configuration from one explicit file. File layers are replaced, environment still applies.
    pub fn load_from_file(path: &Path) -> Result<FoundryConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?
            .add_source(File::from(path).required(true));
        let builder = environment::add_to_builder(builder);
        builder.build()?.try_deserialize()
    }

    /// Defaults only, without any file or environment layer.
    pub fn defaults() -> Result<FoundryConfig, ConfigError> {
        merge_policy::builder_with_defaults()?
            .build()?
            .try_deserialize()
    }

    pub fn global_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }
}
