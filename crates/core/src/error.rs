//! Error kinds for the domain layer. Adapter crates define their own
//! errors for I/O-bound concerns (cluster, cypher, repository) and convert
//! into these only where the domain boundary requires it.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("object payload is not a JSON mapping at the root")]
    RootNotMapping,
}

#[derive(Debug, Error)]
pub enum FileManagerError {
    #[error("failed to create parent directories for {path}: {source}")]
    CreateParent { path: PathBuf, #[source] source: std::io::Error },

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, #[source] source: std::io::Error },

    #[error("failed to delete {path}: {source}")]
    Delete { path: PathBuf, #[source] source: std::io::Error },

    #[error("failed to reset current directory: {source}")]
    Reset { #[source] source: std::io::Error },
}

impl FileManagerError {
    /// True for the "file not found" condition callers are explicitly
    /// allowed to tolerate when a delete races a concurrent reconcile.
    pub fn is_not_found(&self) -> bool {
        match self {
            FileManagerError::Delete { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
