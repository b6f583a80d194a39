//! The three external-collaborator seams this system depends on: the
//! cluster API client, the version-control backend, and the
//! envelope-encryption engine. `dump-adapters` provides the production
//! implementations; `dump-daemon`'s tests provide fakes.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ids::ResourceTypeId;
use crate::resource_object::ResourceObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Added,
    Modified,
    Deleted,
}

impl WatchEventKind {
    /// Lowercase event-type name, used verbatim in commit messages as
    /// `<event-type-lowercase>: <path>`.
    pub fn as_lowercase(&self) -> &'static str {
        match self {
            WatchEventKind::Added => "added",
            WatchEventKind::Modified => "modified",
            WatchEventKind::Deleted => "deleted",
        }
    }
}

pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub object: ResourceObject,
}

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("resource type {0} was not found (withdrawn from the server)")]
    NotFound(String),
    #[error("discovery failed: {0}")]
    Discovery(String),
    #[error("list failed for {0}: {1}")]
    List(String, String),
    #[error("watch failed for {0}: {1}")]
    Watch(String, String),
    #[error("malformed object from cluster: {0}")]
    Malformed(#[from] crate::error::FilterError),
}

impl ClusterError {
    /// True for the "resource withdrawn" condition, treated as non-fatal:
    /// remove the Watcher and let the next discovery cycle decide whether
    /// to restore it.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }
}

/// Dynamic LIST/WATCH over resource types, plus discovery of which types
/// support the "watch" verb. Implemented by `dump_adapters::kube_client`.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn discover(&self) -> Result<Vec<ResourceTypeId>, ClusterError>;

    async fn list(&self, id: &ResourceTypeId) -> Result<Vec<ResourceObject>, ClusterError>;

    /// Opens a watch stream for `id`, forwarding events until `cancel` is
    /// triggered or the stream ends. The returned receiver closes when the
    /// forwarding task exits either way.
    async fn watch(
        &self,
        id: &ResourceTypeId,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Result<WatchEvent, ClusterError>>, ClusterError>;
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("git {command} failed: {message}")]
    CommandFailed { command: &'static str, message: String },
    #[error("io error running git: {0}")]
    Io(#[from] std::io::Error),
}

/// Serialized gateway to the version-control worktree. All mutations pass
/// through this one operation; the implementation is responsible for the
/// exclusive worktree lock.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Returns `Ok(true)` iff the remote strictly advanced. Returns
    /// `Ok(false)` iff every path in `paths` had an empty staged diff *and*
    /// unstaging them succeeded — a failed unstage must be surfaced as an
    /// error, never folded into "nothing changed".
    async fn add_commit_and_push(&self, message: &str, paths: &[std::path::PathBuf]) -> Result<bool, RepositoryError>;
}

#[derive(Debug, Error)]
pub enum CypherError {
    #[error("no encryption policy rule matches path {0}")]
    NoMatchingRule(String),
    #[error("invalid policy file: {0}")]
    InvalidPolicy(String),
    #[error("yaml error: {0}")]
    Yaml(String),
    #[error("crypto error: {0}")]
    Crypto(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Envelope-encryption of a single logical file, keyed by its repository
/// path. Pure with respect to its inputs modulo the random per-document
/// data key.
pub trait Cypher: Send + Sync {
    fn encrypt(&self, path: &Path, plaintext_yaml: &[u8]) -> Result<Vec<u8>, CypherError>;
    fn decrypt(&self, path: &Path) -> Result<Vec<u8>, CypherError>;
}
