use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use super::env::env_entries;
use super::SettingsError;

#[derive(Debug)]
enum Source {
    File { path: PathBuf, required: bool },
    Env { prefix: String, separator: String },
}

/// Layered loader for registry settings.
///
/// TOML files and environment variables are applied in registration order;
/// later sources override earlier ones. Nested tables merge recursively,
/// everything else is replaced.
///
/// ```no_run
/// use adapta::{RegistrySettings, SettingsLoader};
///
/// // defaults -> site file -> ADAPTA__CONFIG_ROOT=...
/// let settings: RegistrySettings = SettingsLoader::new()
///     .with_file("/etc/adapta/settings.toml", false)
///     .with_env("ADAPTA", "__")
///     .build()?;
/// # Ok::<(), adapta::SettingsError>(())
/// ```
#[derive(Debug, Default)]
#[must_use = "loaders do nothing until .build() is called"]
pub struct SettingsLoader {
    sources: Vec<Source>,
}

impl SettingsLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a TOML file. Missing optional files are skipped.
    pub fn with_file(mut self, path: impl AsRef<Path>, required: bool) -> Self {
        self.sources.push(Source::File {
            path: path.as_ref().to_path_buf(),
            required,
        });
        self
    }

    /// Adds environment variables named `{prefix}{separator}{path...}`.
    ///
    /// Path segments are lowercased, so `ADAPTA__CONFIG_ROOT` sets
    /// `config_root`. Values are coerced to bool, integer or float where they
    /// look like one.
    pub fn with_env(mut self, prefix: impl Into<String>, separator: impl Into<String>) -> Self {
        self.sources.push(Source::Env {
            prefix: prefix.into(),
            separator: separator.into(),
        });
        self
    }

    /// Merges every source and deserializes the result once.
    pub fn build<T: DeserializeOwned>(self) -> Result<T, SettingsError> {
        self.build_from(std::env::vars())
    }

    /// Same as [`build`](Self::build), reading env sources from `vars`.
    fn build_from<T: DeserializeOwned>(
        self,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<T, SettingsError> {
        let vars: Vec<(String, String)> = vars.into_iter().collect();
        let mut merged = toml::Table::new();

        for source in self.sources {
            match source {
                Source::File { path, required } => {
                    if let Some(layer) = read_layer(&path, required)? {
                        overlay_table(&mut merged, layer);
                    }
                }
                Source::Env { prefix, separator } => {
                    for (path, value) in env_entries(vars.iter().cloned(), &prefix, &separator)? {
                        merge_at_path(&mut merged, &path, value);
                    }
                }
            }
        }

        toml::Value::Table(merged)
            .try_into()
            .map_err(SettingsError::DeserializeError)
    }
}

/// One settings file as a table; `None` when it is absent and optional.
fn read_layer(path: &Path, required: bool) -> Result<Option<toml::Table>, SettingsError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
            tracing::debug!(path = %path.display(), "settings file absent, skipping");
            return Ok(None);
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }
        Err(source) => {
            return Err(SettingsError::ReadError {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    toml::from_str(&contents)
        .map(Some)
        .map_err(|source| SettingsError::ParseError {
            path: path.to_path_buf(),
            source,
        })
}

fn merge_at_path(table: &mut toml::Table, path: &[String], value: toml::Value) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };

    if rest.is_empty() {
        table.insert(first.clone(), value);
        return;
    }

    if !matches!(table.get(first), Some(toml::Value::Table(_))) {
        table.insert(first.clone(), toml::Value::Table(toml::Table::new()));
    }
    if let Some(toml::Value::Table(nested)) = table.get_mut(first) {
        merge_at_path(nested, rest, value);
    }
}

/// Lays `layer` over `base`: tables on both sides merge, anything else in
/// `layer` wins.
fn overlay_table(base: &mut toml::Table, layer: toml::Table) {
    for (key, incoming) in layer {
        match base.entry(key) {
            toml::map::Entry::Vacant(slot) => {
                slot.insert(incoming);
            }
            toml::map::Entry::Occupied(mut slot) => match (slot.get_mut(), incoming) {
                (toml::Value::Table(existing), toml::Value::Table(nested)) => {
                    overlay_table(existing, nested);
                }
                (current, replacement) => *current = replacement,
            },
        }
    }
}
