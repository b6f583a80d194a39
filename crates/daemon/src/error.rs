//! Top-level error aggregation. Everything that reaches
//! `main` is one of these; `main` logs it and exits nonzero.

use thiserror::Error;

use dump_core::traits::{ClusterError, CypherError, RepositoryError};
use dump_core::{FileManagerError, FilterError};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Cypher(#[from] CypherError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    FileManager(#[from] FileManagerError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
