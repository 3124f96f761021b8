//! Settings for the registry itself: where configs live and how they are read.

mod builder;
mod env;
mod error;

use std::path::{Path, PathBuf};

use serde::Deserialize;

pub use builder::SettingsLoader;
pub use error::SettingsError;

/// Default file extension of adapter config documents.
pub const DEFAULT_EXTENSION: &str = "json";

/// Default environment variable holding the context override table.
pub const DEFAULT_CONTEXT_MAP_VAR: &str = "ADAPTA_CONTEXT_MAP";

/// Settings consumed by [`Registry::from_settings`](crate::Registry::from_settings).
///
/// ```toml
/// config_root = "deploy/configs"
/// extension = "json"
/// context_map_var = "ADAPTA_CONTEXT_MAP"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub config_root: PathBuf,
    pub extension: String,
    pub context_map_var: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            config_root: PathBuf::from("."),
            extension: DEFAULT_EXTENSION.to_string(),
            context_map_var: DEFAULT_CONTEXT_MAP_VAR.to_string(),
        }
    }
}

impl RegistrySettings {
    /// Loads settings from an optional TOML file, then `ADAPTA__*` variables.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        SettingsLoader::new()
            .with_file(path, false)
            .with_env("ADAPTA", "__")
            .build()
    }
}
