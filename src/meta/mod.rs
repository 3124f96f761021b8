//! Config documents: decoding, naming and context resolution.

mod context;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Deserializer};

pub use context::ContextOverrides;

use crate::index::{FileSystem, SearchIndex};
use crate::path::resolve_against;
use crate::{Error, Result};

/// A request to construct another adapter as a dependency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DepRef {
    #[serde(rename = "adapter")]
    pub adapter_id: String,
    /// Item config for the dependency; becomes its first argument.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

impl DepRef {
    pub fn new(adapter_id: impl Into<String>) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            ..Self::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Positional arguments for constructing the dependency: `name`, then `args`.
    pub fn construction_args(&self) -> Vec<String> {
        self.name
            .iter()
            .filter(|n| !n.is_empty())
            .chain(self.args.iter())
            .cloned()
            .collect()
    }
}

/// Decoded header of one config document.
///
/// ```json
/// {
///   "name": "inst1",
///   "api_version": "v1",
///   "adapter": "adp",
///   "dependencies": { "lister_provider": { "adapter": "lister-adp" } },
///   "spec": { "foo": "item-foo" },
///   "context": "../work"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MetaHeader {
    /// Defaults to the file's base name.
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub api_version: String,
    #[serde(default, rename = "adapter", deserialize_with = "null_as_default")]
    pub adapter_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dependencies: BTreeMap<String, DepRef>,
    /// Adapter-defined payload, handed to the adapter undecoded.
    #[serde(default)]
    pub spec: Option<serde_json::Value>,
    /// Absolute once loaded through [`MetaLoader`].
    #[serde(default, deserialize_with = "non_empty_path")]
    pub context: Option<PathBuf>,
    /// File the header was read from.
    #[serde(skip)]
    pub source: PathBuf,
    /// Full index key of that file; unique even when names collide.
    #[serde(skip)]
    pub key: String,
}

impl MetaHeader {
    /// The `spec` payload, unless absent or `null`.
    pub fn spec(&self) -> Option<&serde_json::Value> {
        self.spec.as_ref().filter(|v| !v.is_null())
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn non_empty_path<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.trim().is_empty()).map(PathBuf::from))
}

/// Loads [`MetaHeader`]s by name through a [`SearchIndex`].
#[derive(Debug, Clone)]
pub struct MetaLoader {
    index: SearchIndex,
    fs: Arc<dyn FileSystem>,
    overrides: ContextOverrides,
}

impl MetaLoader {
    pub fn new(index: SearchIndex, fs: Arc<dyn FileSystem>, overrides: ContextOverrides) -> Self {
        Self {
            index,
            fs,
            overrides,
        }
    }

    pub fn index(&self) -> &SearchIndex {
        &self.index
    }

    /// Resolves, reads and decodes the document called `name`.
    ///
    /// A relative `context` is anchored at the document's own directory, after
    /// any override registered for the decoded name has been applied.
    pub fn load(&self, name: &str, verbose: bool) -> Result<MetaHeader> {
        let path = self.index.resolve(name)?;
        if verbose {
            tracing::debug!(name, path = %path.display(), "reading config");
        }

        let data = self.fs.read(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut header: MetaHeader =
            serde_json::from_slice(&data).map_err(|source| Error::Decode {
                path: path.to_path_buf(),
                source,
            })?;

        if header.name.trim().is_empty() {
            header.name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
        }

        if let Some(context) = self.overrides.get(&header.name) {
            header.context = Some(context.to_path_buf());
        }

        if let Some(context) = header.context.take() {
            let dir = path.parent().unwrap_or(Path::new("/"));
            let resolved = resolve_against(dir, &context).map_err(|source| Error::Read {
                path: context.clone(),
                source,
            })?;
            header.context = Some(resolved);
        }

        header.key = self.index.key_of(path).unwrap_or(name).to_string();
        header.source = path.to_path_buf();
        Ok(header)
    }

    /// Like [`load`](Self::load), but a missing document is `Ok(None)`.
    pub fn load_optional(&self, name: &str, verbose: bool) -> Result<Option<MetaHeader>> {
        match self.load(name, verbose) {
            Ok(header) => Ok(Some(header)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Loads every indexed document in full-key order, optionally keeping
    /// only those whose `adapter` matches `adapter_id` (case-insensitively).
    ///
    /// Documents whose file disappeared after indexing are skipped.
    pub fn load_all(&self, adapter_id: Option<&str>) -> Result<Vec<(String, MetaHeader)>> {
        let mut result = Vec::new();
        for key in self.index.keys() {
            let header = match self.load(key, false) {
                Ok(header) => header,
                Err(err) if err.is_not_found() => {
                    tracing::info!(key, "could not find config, skipping");
                    continue;
                }
                Err(err) => return Err(err),
            };
            if let Some(id) = adapter_id {
                if !header.adapter_id.eq_ignore_ascii_case(id) {
                    continue;
                }
            }
            result.push((key.to_string(), header));
        }
        Ok(result)
    }
}
