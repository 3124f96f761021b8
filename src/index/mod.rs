//! Lookup tables from config names to config files.

mod fs;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub use fs::{FileSystem, OsFs};

use crate::path::absolutize;
use crate::{Error, Result};

/// Index of every config document under a root directory.
///
/// A document at `<root>/env/dev.json` is reachable by its full key `env/dev`
/// and by its short key `dev`. Full keys are unique; short keys may collide
/// across directories, in which case resolving them is an error.
///
/// All stored paths are absolute, so the index stays valid if the process
/// changes directory later.
#[derive(Debug, Clone, Default)]
pub struct SearchIndex {
    root: PathBuf,
    short: BTreeMap<String, Vec<PathBuf>>,
    full: BTreeMap<String, PathBuf>,
}

impl SearchIndex {
    /// Walks `root` and indexes every file ending in `.{extension}`.
    pub fn build(fs: &dyn FileSystem, root: impl AsRef<Path>, extension: &str) -> Result<Self> {
        let root = root.as_ref();
        let mut index = Self {
            root: root.to_path_buf(),
            ..Self::default()
        };

        for path in fs.walk_files(root)? {
            if path.extension().and_then(|e| e.to_str()) != Some(extension) {
                continue;
            }
            let Some(short_key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(full_key) = relative_key(root, &path) else {
                continue;
            };

            let abs = absolutize(&path).map_err(|source| Error::Read {
                path: path.clone(),
                source,
            })?;

            index
                .short
                .entry(short_key.to_string())
                .or_default()
                .push(abs.clone());
            index.full.insert(full_key, abs);
        }

        tracing::debug!(
            root = %root.display(),
            documents = index.full.len(),
            "indexed config root"
        );
        Ok(index)
    }

    /// Resolves a full key (`env/dev`) or a short key (`dev`) to a file.
    pub fn resolve(&self, name: &str) -> Result<&Path> {
        if let Some(path) = self.full.get(name) {
            return Ok(path.as_path());
        }

        match self.short.get(name).map(Vec::as_slice) {
            None | Some([]) => Err(Error::NotFound {
                name: name.to_string(),
            }),
            Some([path]) => Ok(path.as_path()),
            Some(candidates) => Err(Error::Ambiguous {
                name: name.to_string(),
                candidates: candidates.to_vec(),
            }),
        }
    }

    /// The full key a resolved path was indexed under.
    pub fn key_of(&self, path: &Path) -> Option<&str> {
        self.full
            .iter()
            .find(|(_, indexed)| indexed.as_path() == path)
            .map(|(key, _)| key.as_str())
    }

    /// Full keys in lexicographic order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.full.keys().map(String::as_str)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.full.len()
    }

    pub fn is_empty(&self) -> bool {
        self.full.is_empty()
    }
}

/// `<root>/a/b.json` -> `a/b`, always `/`-separated.
fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?.with_extension("");
    let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree(files: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for file in files {
            let path = dir.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "{}").unwrap();
        }
        dir
    }

    #[test]
    fn test_indexes_full_and_short_keys() {
        let dir = tree(&["adp.json", "items/inst1.json", "notes.txt"]);
        let index = SearchIndex::build(&OsFs, dir.path(), "json").unwrap();

        assert_eq!(index.keys().collect::<Vec<_>>(), vec!["adp", "items/inst1"]);
        assert_eq!(
            index.resolve("inst1").unwrap(),
            index.resolve("items/inst1").unwrap()
        );
        assert!(index.resolve("adp").unwrap().is_absolute());
        assert!(index.resolve("notes").unwrap_err().is_not_found());
    }

    #[test]
    fn test_short_key_ambiguity_lists_candidates() {
        let dir = tree(&["env/dev.json", "team/dev.json"]);
        let index = SearchIndex::build(&OsFs, dir.path(), "json").unwrap();

        match index.resolve("dev") {
            Err(Error::Ambiguous { name, candidates }) => {
                assert_eq!(name, "dev");
                assert_eq!(candidates.len(), 2);
                assert!(candidates.iter().all(|p| p.is_absolute()));
                assert!(candidates[0].ends_with("env/dev.json"));
                assert!(candidates[1].ends_with("team/dev.json"));
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }

        assert!(index.resolve("env/dev").unwrap().ends_with("env/dev.json"));
        assert!(index.resolve("team/dev").unwrap().ends_with("team/dev.json"));
    }

    #[test]
    fn test_full_key_wins_over_short_key() {
        let dir = tree(&["dev.json", "env/dev.json"]);
        let index = SearchIndex::build(&OsFs, dir.path(), "json").unwrap();

        let resolved = index.resolve("dev").unwrap();
        assert_eq!(resolved.file_name().unwrap(), "dev.json");
        assert!(!resolved.ends_with("env/dev.json"));
        assert!(index.resolve("env/dev").unwrap().ends_with("env/dev.json"));
    }

    #[test]
    fn test_missing_root_is_walk_error() {
        let result = SearchIndex::build(&OsFs, "/nonexistent/adapta/root", "json");
        assert!(matches!(result, Err(Error::Walk { .. })));
    }
}
