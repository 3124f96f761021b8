use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::path::clean;
use crate::{Error, Result};

/// Per-config replacements for the `context` of a document, keyed by the
/// document's resolved `name`.
///
/// Deployments that relocate working trees (containers with volume mounts,
/// CI checkouts) use this to repoint contexts without editing configs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextOverrides {
    by_name: HashMap<String, PathBuf>,
}

impl ContextOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a JSON object `{"<name>": "<context>", ...}` from `var`.
    ///
    /// An unset or blank variable yields an empty table.
    pub fn from_env(var: &str) -> Result<Self> {
        match std::env::var(var) {
            Ok(raw) if !raw.trim().is_empty() => Self::from_json(var, &raw),
            _ => Ok(Self::default()),
        }
    }

    fn from_json(var: &str, raw: &str) -> Result<Self> {
        let map: HashMap<String, String> =
            serde_json::from_str(raw).map_err(|source| Error::ContextOverrides {
                var: var.to_string(),
                source,
            })?;
        Ok(Self::from_map(map))
    }

    pub fn from_map<K, V>(map: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: AsRef<Path>,
    {
        Self {
            by_name: map
                .into_iter()
                .map(|(k, v)| (k.into(), clean(v.as_ref())))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Path> {
        self.by_name.get(name).map(PathBuf::as_path)
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
