//! One instance per resource type: fuses a LIST-based
//! reconcile with a long-lived incremental event stream, projecting
//! objects to files and funneling every change through the Repository.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use dump_core::traits::{
    ClusterClient, ClusterError, Cypher, CypherError, Repository, RepositoryError, WatchEventKind,
};
use dump_core::{filter, file_manager, FieldPathSet, FileManagerError, FilterError, GroupResource, ResourceObject, ResourceTypeId};

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Cypher(#[from] CypherError),
    #[error(transparent)]
    FileManager(#[from] FileManagerError),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error("yaml serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("object has no metadata.name")]
    MissingName,
}

impl WatcherError {
    /// True for the "resource withdrawn" condition Manager treats as
    /// non-fatal.
    pub fn is_not_found(&self) -> bool {
        matches!(self, WatcherError::Cluster(e) if e.is_not_found())
    }
}

/// `Idle → Listing → Streaming → {Stopped | Failed}`. Only `Failed`
/// triggers Manager-driven removal-and-restart; normal stream closure
/// returns to `Idle` and the supervisor re-enters `start()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherStatus {
    Idle,
    Listing,
    Streaming,
    Stopped,
    Failed,
}

pub struct Watcher {
    id: ResourceTypeId,
    group_resource: GroupResource,
    cluster: Arc<dyn ClusterClient>,
    repository: Arc<dyn Repository>,
    cypher: Arc<dyn Cypher>,
    field_filters: Arc<FieldPathSet>,
    worktree_root: PathBuf,
    state: HashSet<PathBuf>,
    status: WatcherStatus,
}

impl Watcher {
    /// Scans the existing working tree under `*/<group-resource>/*` to seed
    /// `WatcherState`, so the first reconcile can detect deletions that
    /// happened while the process was stopped.
    pub fn new(
        id: ResourceTypeId,
        cluster: Arc<dyn ClusterClient>,
        repository: Arc<dyn Repository>,
        cypher: Arc<dyn Cypher>,
        field_filters: Arc<FieldPathSet>,
        worktree_root: PathBuf,
    ) -> Self {
        let group_resource = id.group_resource();
        let state = scan_existing_paths(&worktree_root, &group_resource);
        Self {
            id,
            group_resource,
            cluster,
            repository,
            cypher,
            field_filters,
            worktree_root,
            state,
            status: WatcherStatus::Idle,
        }
    }

    pub fn status(&self) -> WatcherStatus {
        self.status
    }

    pub fn id(&self) -> &ResourceTypeId {
        &self.id
    }

    /// Runs one full LIST-then-WATCH cycle. Returns `Ok(())` on normal
    /// stream closure (the caller re-enters `start()`); returns `Err` on
    /// any cluster, filesystem, repository, or encryption failure.
    pub async fn start(&mut self, cancel: CancellationToken) -> Result<(), WatcherError> {
        let mut events = self.cluster.watch(&self.id, cancel).await?;

        self.status = WatcherStatus::Listing;
        self.reconcile().await?;

        self.status = WatcherStatus::Streaming;
        let result = self.stream_events(&mut events).await;
        self.status = match &result {
            Ok(()) => WatcherStatus::Idle,
            Err(_) => WatcherStatus::Failed,
        };
        result
    }

    pub fn stop(&mut self) {
        self.status = WatcherStatus::Stopped;
    }

    async fn reconcile(&mut self) -> Result<(), WatcherError> {
        let objects = self.cluster.list(&self.id).await?;

        let mut new_state = HashSet::new();
        let mut affected = Vec::new();
        for object in objects {
            if let Some(path) = self.write_pipeline(object)? {
                new_state.insert(path.clone());
                affected.push(path);
            }
        }

        for stale in self.state.difference(&new_state).cloned().collect::<Vec<_>>() {
            self.delete_on_disk(&stale)?;
            affected.push(stale);
        }

        self.state = new_state;
        self.commit_if_needed(&format!("reconcile: {}", self.group_resource), affected).await?;
        Ok(())
    }

    async fn stream_events(
        &mut self,
        events: &mut tokio::sync::mpsc::Receiver<Result<dump_core::traits::WatchEvent, ClusterError>>,
    ) -> Result<(), WatcherError> {
        while let Some(event) = events.recv().await {
            let event = event?;
            let label = event.kind.as_lowercase();

            match event.kind {
                WatchEventKind::Added | WatchEventKind::Modified => {
                    if let Some(path) = self.write_pipeline(event.object)? {
                        self.state.insert(path.clone());
                        let message = format!("{label}: {}", path.display());
                        self.repository.add_commit_and_push(&message, std::slice::from_ref(&path)).await?;
                    }
                }
                WatchEventKind::Deleted => {
                    let namespace = event.object.namespace().map(str::to_string);
                    let name = event.object.name().ok_or(WatcherError::MissingName)?.to_string();
                    let path = filter::resource_path(namespace.as_deref(), &self.group_resource, &name);
                    self.delete_on_disk(&path)?;
                    self.state.remove(&path);
                    let message = format!("{label}: {}", path.display());
                    self.repository.add_commit_and_push(&message, std::slice::from_ref(&path)).await?;
                }
            }
        }
        Ok(())
    }

    /// Write pipeline: filter, strip, serialize, encrypt `secrets`
    /// group-resources, write via the file manager. Returns the relative
    /// path written, or `None` if the object is skipped.
    fn write_pipeline(&self, object: ResourceObject) -> Result<Option<PathBuf>, WatcherError> {
        if filter::should_not_write(&object) {
            return Ok(None);
        }
        let mut object = object;
        filter::strip_fields(&mut object, &self.field_filters)?;

        let namespace = object.namespace().map(str::to_string);
        let name = object.name().ok_or(WatcherError::MissingName)?.to_string();
        let path = filter::resource_path(namespace.as_deref(), &self.group_resource, &name);

        let value = object.into_value();
        let mut bytes = serde_yaml::to_string(&value)?.into_bytes();
        if self.group_resource.resource == "secrets" {
            bytes = self.cypher.encrypt(&path, &bytes)?;
        }

        file_manager::write_file(&self.worktree_root.join(&path), &bytes)?;
        Ok(Some(path))
    }

    /// Delete pipeline: a missing file is tolerated — it means the
    /// deletion already raced ahead of a concurrent reconcile.
    fn delete_on_disk(&self, path: &Path) -> Result<(), WatcherError> {
        match file_manager::delete_file(&self.worktree_root.join(path), &self.worktree_root) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn commit_if_needed(&self, message: &str, paths: Vec<PathBuf>) -> Result<(), WatcherError> {
        if paths.is_empty() {
            return Ok(());
        }
        self.repository.add_commit_and_push(message, &paths).await?;
        Ok(())
    }
}

fn scan_existing_paths(root: &Path, group_resource: &GroupResource) -> HashSet<PathBuf> {
    let mut paths = HashSet::new();
    let gr_name = group_resource.to_string();

    let Ok(namespace_dirs) = std::fs::read_dir(root) else { return paths };
    for namespace_entry in namespace_dirs.flatten() {
        let namespace_path = namespace_entry.path();
        if !namespace_path.is_dir() {
            continue;
        }
        let Ok(files) = std::fs::read_dir(namespace_path.join(&gr_name)) else { continue };
        for file_entry in files.flatten() {
            let file_path = file_entry.path();
            if file_path.is_file() {
                if let Ok(relative) = file_path.strip_prefix(root) {
                    paths.insert(relative.to_path_buf());
                }
            }
        }
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn scan_finds_only_matching_group_resource_files() {
        let dir = tempdir().unwrap();
        let gr = GroupResource::new("", "configmaps");
        std::fs::create_dir_all(dir.path().join("prod/configmaps")).unwrap();
        std::fs::write(dir.path().join("prod/configmaps/app-cfg.yaml"), "a: 1").unwrap();
        std::fs::create_dir_all(dir.path().join("prod/secrets")).unwrap();
        std::fs::write(dir.path().join("prod/secrets/db.yaml"), "a: 1").unwrap();

        let found = scan_existing_paths(dir.path(), &gr);
        assert_eq!(found.len(), 1);
        assert!(found.contains(&PathBuf::from("prod/configmaps/app-cfg.yaml")));
    }

    #[test]
    fn scan_on_empty_tree_is_empty() {
        let dir = tempdir().unwrap();
        let gr = GroupResource::new("", "configmaps");
        assert!(scan_existing_paths(dir.path(), &gr).is_empty());
    }
}

#[cfg(test)]
#[path = "watcher_scenario_tests.rs"]
mod scenario_tests;
