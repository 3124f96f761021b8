use std::path::PathBuf;

use thiserror::Error;

use crate::settings::SettingsError;

/// Error returned by hooks implemented on adapters.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Top-level error type for the adapta library.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("config {name:?} not found")]
    NotFound { name: String },

    #[error("ambiguous config {name:?} matches:\n  - {}", join_paths(.candidates))]
    Ambiguous {
        name: String,
        candidates: Vec<PathBuf>,
    },

    #[error("failed to walk config root '{}': {source}", .root.display())]
    Walk {
        root: PathBuf,
        source: walkdir::Error,
    },

    #[error("failed to read '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to decode '{}': {source}", .path.display())]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to parse context overrides from ${var}: {source}")]
    ContextOverrides {
        var: String,
        source: serde_json::Error,
    },

    #[error("unknown adapter {0:?}")]
    UnknownAdapter(String),

    #[error("decode {target} spec for adapter {adapter}: {source}")]
    Spec {
        adapter: String,
        target: String,
        source: serde_json::Error,
    },

    #[error("adapter {adapter}: field {field:?} not found")]
    FieldNotFound { adapter: String, field: String },

    #[error("adapter {adapter}: dependency {actual} not assignable to field {field:?} ({expected})")]
    TypeMismatch {
        adapter: String,
        field: String,
        expected: &'static str,
        actual: String,
    },

    #[error("adapter {adapter}: failed loading dependency {name:?}: {source}")]
    Dependency {
        adapter: String,
        name: String,
        source: Box<Error>,
    },

    #[error("adapter {adapter}: missing required dependency: field {field:?} is not set")]
    MissingRequired { adapter: String, field: String },

    #[error("hydrating adapter {adapter}: {source}")]
    Hydration { adapter: String, source: HookError },

    #[error("cyclic dependency: {}", .chain.join(" -> "))]
    CyclicDependency { chain: Vec<String> },

    #[error("adapter {adapter:?} does not implement requested type {expected}")]
    AdapterType {
        adapter: String,
        expected: &'static str,
    },
}

impl Error {
    /// Whether this error means "nothing there" rather than "something broken".
    ///
    /// Unknown adapter ids, unresolved config names and files that vanished
    /// after indexing all count.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } | Error::UnknownAdapter(_) => true,
            Error::Read { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("\n  - ")
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
