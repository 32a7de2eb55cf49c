//! Error types for mirror-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{Namespace, ObjectKey};

/// All errors that can arise from object store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The addressed object does not exist.
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: ObjectKey },

    /// Optimistic write against a stale resource version.
    #[error("conflict writing {kind} {key}: stored version {stored}, given {given}")]
    Conflict {
        kind: String,
        key: ObjectKey,
        stored: u64,
        given: u64,
    },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: String, key: ObjectKey },

    /// Objects may only be created in namespaces that already exist.
    #[error("namespace '{0}' does not exist")]
    NamespaceNotFound(Namespace),

    /// Rejected by structural validation.
    #[error("invalid {kind} {key}: {message}")]
    Invalid {
        kind: String,
        key: ObjectKey,
        message: String,
    },

    /// A namespace name that cannot address a store location.
    #[error("invalid namespace '{namespace}': {message}")]
    InvalidNamespace { namespace: Namespace, message: String },

    /// The backing store refused or failed the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Underlying I/O failure, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the offending file.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub(crate) fn not_found(kind: impl Into<String>, key: &ObjectKey) -> Self {
        StoreError::NotFound {
            kind: kind.into(),
            key: key.clone(),
        }
    }
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
