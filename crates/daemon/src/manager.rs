//! Top-level control loop: periodically discovers resource
//! types, spawns/retains one watcher per type, garbage-collects files for
//! types that disappeared, and restarts failed watchers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use dump_core::traits::{ClusterClient, Cypher, Repository};
use dump_core::{file_manager, filter, FieldPathSet, ResourceTypeId};

use crate::watcher::{Watcher, WatcherError};

struct WatcherHandle {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

pub struct Manager {
    cluster: Arc<dyn ClusterClient>,
    repository: Arc<dyn Repository>,
    cypher: Arc<dyn Cypher>,
    field_filters: Arc<FieldPathSet>,
    worktree_root: PathBuf,
    refresh_interval: Duration,
    watchers: RwLock<HashMap<ResourceTypeId, WatcherHandle>>,
}

impl Manager {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        repository: Arc<dyn Repository>,
        cypher: Arc<dyn Cypher>,
        field_filters: Arc<FieldPathSet>,
        worktree_root: PathBuf,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            cluster,
            repository,
            cypher,
            field_filters,
            worktree_root,
            refresh_interval,
            watchers: RwLock::new(HashMap::new()),
        }
    }

    /// Infinite discovery loop: discover, spawn missing watchers, sweep
    /// untracked group-resources, sleep, repeat. Returns only on a fatal,
    /// non-recoverable error (discovery itself failing).
    ///
    /// Takes `self: Arc<Self>` rather than `&self` because a spawned
    /// watcher's supervisor task needs to call back into the map (to
    /// remove itself on "resource withdrawn") long after `manage()`'s own
    /// call frame has moved on to sleeping or the next discovery cycle.
    pub async fn manage(self: Arc<Self>) -> Result<(), WatcherError> {
        loop {
            let discovered = filter::gvrs(self.cluster.discover().await?);
            self.start_missing(&discovered).await;
            self.sweep_untracked(&discovered).await?;
            tokio::time::sleep(self.refresh_interval).await;
        }
    }

    async fn start_missing(self: &Arc<Self>, discovered: &[ResourceTypeId]) {
        let mut watchers = self.watchers.write().await;
        for id in discovered {
            if watchers.contains_key(id) {
                continue;
            }
            let cancel = CancellationToken::new();
            let watcher = Watcher::new(
                id.clone(),
                Arc::clone(&self.cluster),
                Arc::clone(&self.repository),
                Arc::clone(&self.cypher),
                Arc::clone(&self.field_filters),
                self.worktree_root.clone(),
            );
            let task = self.spawn_watcher_runner(watcher, cancel.clone());
            watchers.insert(id.clone(), WatcherHandle { cancel, task });
        }
    }

    /// Repeatedly re-enters `start()` while the watcher is still tracked.
    /// A "resource withdrawn" error removes it from the map so the next
    /// discovery cycle is free to spawn a fresh watcher should the type
    /// reappear; any other error is fatal to the process.
    fn spawn_watcher_runner(self: &Arc<Self>, mut watcher: Watcher, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let id = watcher.id().clone();
        let manager = Arc::clone(self);
        let span = tracing::info_span!("watcher", group_resource = %id.group_resource());
        tokio::spawn(async move {
            let _enter = span.enter();
            loop {
                if cancel.is_cancelled() {
                    watcher.stop();
                    return;
                }
                match watcher.start(cancel.clone()).await {
                    Ok(()) => {
                        tracing::info!("watch stream closed normally, reconnecting");
                        continue;
                    }
                    Err(e) if e.is_not_found() => {
                        tracing::warn!(error = %e, "resource type withdrawn, stopping watcher");
                        manager.remove_watcher(&id).await;
                        return;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "watcher failed fatally");
                        std::process::exit(1);
                    }
                }
            }
        })
    }

    /// Removes `id` from the map without touching its cancellation token
    /// or aborting its task: called by the watcher's own supervisor task
    /// as it exits on "resource withdrawn", so the task must not abort
    /// itself here.
    async fn remove_watcher(&self, id: &ResourceTypeId) {
        self.watchers.write().await.remove(id);
    }

    /// Walks the working tree for files whose parent-directory basename is
    /// a group-resource no longer in `discovered`, deletes them, and
    /// commits the batched deletions per affected group-resource.
    async fn sweep_untracked(&self, discovered: &[ResourceTypeId]) -> Result<(), WatcherError> {
        let tracked: std::collections::HashSet<String> =
            discovered.iter().map(|id| id.group_resource().to_string()).collect();

        let mut deleted_by_group_resource: HashMap<String, Vec<PathBuf>> = HashMap::new();

        let Ok(namespace_dirs) = std::fs::read_dir(&self.worktree_root) else { return Ok(()) };
        for namespace_entry in namespace_dirs.flatten() {
            let namespace_path = namespace_entry.path();
            if !namespace_path.is_dir() {
                continue;
            }
            if namespace_path.file_name().is_some_and(|n| n.to_string_lossy().starts_with('.')) {
                continue;
            }
            let Ok(group_resource_dirs) = std::fs::read_dir(&namespace_path) else { continue };
            for gr_entry in group_resource_dirs.flatten() {
                let gr_path = gr_entry.path();
                let Some(gr_name) = gr_path.file_name().and_then(|n| n.to_str()) else { continue };
                if tracked.contains(gr_name) {
                    continue;
                }
                let Ok(files) = std::fs::read_dir(&gr_path) else { continue };
                for file_entry in files.flatten() {
                    let file_path = file_entry.path();
                    if !file_path.is_file() {
                        continue;
                    }
                    let Ok(relative) = file_path.strip_prefix(&self.worktree_root) else { continue };
                    let relative = relative.to_path_buf();
                    match file_manager::delete_file(&file_path, &self.worktree_root) {
                        Ok(()) => {}
                        Err(e) if e.is_not_found() => {}
                        Err(e) => return Err(e.into()),
                    }
                    deleted_by_group_resource.entry(gr_name.to_string()).or_default().push(relative);
                }
            }
        }

        self.remove_untracked_watchers(&tracked).await;

        for (group_resource, paths) in deleted_by_group_resource {
            self.repository.add_commit_and_push(&format!("reconcile: {group_resource}"), &paths).await?;
        }
        Ok(())
    }

    async fn remove_untracked_watchers(&self, tracked: &std::collections::HashSet<String>) {
        let mut watchers = self.watchers.write().await;
        let stale: Vec<ResourceTypeId> = watchers
            .keys()
            .filter(|id| !tracked.contains(&id.group_resource().to_string()))
            .cloned()
            .collect();
        for id in stale {
            if let Some(handle) = watchers.remove(&id) {
                handle.cancel.cancel();
                handle.task.abort();
            }
        }
    }

    /// Removes each id from the map under the exclusive lock and cancels
    /// its watcher.
    pub async fn stop(&self, ids: &[ResourceTypeId]) {
        let mut watchers = self.watchers.write().await;
        for id in ids {
            if let Some(handle) = watchers.remove(id) {
                handle.cancel.cancel();
                handle.task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    use dump_core::traits::{ClusterError, CypherError, RepositoryError, WatchEvent};
    use dump_core::ResourceObject;

    struct NoopCluster;

    #[async_trait::async_trait]
    impl ClusterClient for NoopCluster {
        async fn discover(&self) -> Result<Vec<ResourceTypeId>, ClusterError> {
            Ok(Vec::new())
        }
        async fn list(&self, _id: &ResourceTypeId) -> Result<Vec<ResourceObject>, ClusterError> {
            Ok(Vec::new())
        }
        async fn watch(
            &self,
            _id: &ResourceTypeId,
            _cancel: CancellationToken,
        ) -> Result<tokio::sync::mpsc::Receiver<Result<WatchEvent, ClusterError>>, ClusterError> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
    }

    /// A cluster whose `watch()` always reports the type withdrawn,
    /// simulating a CRD that disappeared between discovery and the
    /// watcher's first `start()` call.
    struct WithdrawnCluster;

    #[async_trait::async_trait]
    impl ClusterClient for WithdrawnCluster {
        async fn discover(&self) -> Result<Vec<ResourceTypeId>, ClusterError> {
            Ok(Vec::new())
        }
        async fn list(&self, _id: &ResourceTypeId) -> Result<Vec<ResourceObject>, ClusterError> {
            Ok(Vec::new())
        }
        async fn watch(
            &self,
            id: &ResourceTypeId,
            _cancel: CancellationToken,
        ) -> Result<tokio::sync::mpsc::Receiver<Result<WatchEvent, ClusterError>>, ClusterError> {
            Err(ClusterError::NotFound(id.to_string()))
        }
    }

    struct NoopCypher;

    impl Cypher for NoopCypher {
        fn encrypt(&self, _path: &std::path::Path, plaintext: &[u8]) -> Result<Vec<u8>, CypherError> {
            Ok(plaintext.to_vec())
        }
        fn decrypt(&self, path: &std::path::Path) -> Result<Vec<u8>, CypherError> {
            std::fs::read(path).map_err(CypherError::Io)
        }
    }

    /// Records every commit issued, always reporting success — enough to
    /// assert which paths a sweep batched without needing real git state.
    struct RecordingRepository {
        commits: Mutex<Vec<(String, Vec<PathBuf>)>>,
    }

    impl RecordingRepository {
        fn new() -> Self {
            Self { commits: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait::async_trait]
    impl Repository for RecordingRepository {
        async fn add_commit_and_push(&self, message: &str, paths: &[PathBuf]) -> Result<bool, RepositoryError> {
            if paths.is_empty() {
                return Ok(false);
            }
            self.commits.lock().unwrap().push((message.to_string(), paths.to_vec()));
            Ok(true)
        }
    }

    fn new_manager(root: PathBuf, repository: Arc<RecordingRepository>) -> Manager {
        Manager::new(
            Arc::new(NoopCluster),
            repository,
            Arc::new(NoopCypher),
            Arc::new(FieldPathSet::new()),
            root,
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn sweep_untracked_deletes_files_for_withdrawn_group_resources_and_commits() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("prod/configmaps")).unwrap();
        std::fs::write(dir.path().join("prod/configmaps/app-cfg.yaml"), "data: {}\n").unwrap();

        let repository = Arc::new(RecordingRepository::new());
        let manager = new_manager(dir.path().to_path_buf(), Arc::clone(&repository));

        // `configmaps` is no longer in the discovered set, so its files
        // must be swept and the parent directory pruned.
        manager.sweep_untracked(&[]).await.unwrap();

        assert!(!dir.path().join("prod/configmaps/app-cfg.yaml").exists());
        assert!(!dir.path().join("prod/configmaps").exists());

        let commits = repository.commits.lock().unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].0, "reconcile: configmaps");
        assert_eq!(commits[0].1, vec![PathBuf::from("prod/configmaps/app-cfg.yaml")]);
    }

    #[tokio::test]
    async fn sweep_untracked_leaves_tracked_group_resources_alone() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("prod/configmaps")).unwrap();
        std::fs::write(dir.path().join("prod/configmaps/app-cfg.yaml"), "data: {}\n").unwrap();

        let repository = Arc::new(RecordingRepository::new());
        let manager = new_manager(dir.path().to_path_buf(), Arc::clone(&repository));

        let tracked = ResourceTypeId::new("", "v1", "configmaps");
        manager.sweep_untracked(std::slice::from_ref(&tracked)).await.unwrap();

        assert!(dir.path().join("prod/configmaps/app-cfg.yaml").exists());
        assert!(repository.commits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_untracked_never_descends_into_dot_directories() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git/hooks")).unwrap();
        std::fs::write(dir.path().join(".git/hooks/pre-commit.sample"), b"#!/bin/sh\n").unwrap();

        let repository = Arc::new(RecordingRepository::new());
        let manager = new_manager(dir.path().to_path_buf(), Arc::clone(&repository));

        manager.sweep_untracked(&[]).await.unwrap();

        assert!(dir.path().join(".git/hooks/pre-commit.sample").exists());
        assert!(repository.commits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_untracked_removes_withdrawn_watchers_from_the_map() {
        let dir = tempdir().unwrap();
        let repository = Arc::new(RecordingRepository::new());
        let manager = new_manager(dir.path().to_path_buf(), repository);

        let id = ResourceTypeId::new("", "v1", "configmaps");
        let cancel = CancellationToken::new();
        let task = tokio::spawn(async {});
        manager.watchers.write().await.insert(id.clone(), WatcherHandle { cancel, task });
        assert!(manager.watchers.read().await.contains_key(&id));

        manager.sweep_untracked(&[]).await.unwrap();

        assert!(!manager.watchers.read().await.contains_key(&id));
    }

    #[tokio::test]
    async fn withdrawn_watcher_removes_itself_from_the_map_without_waiting_for_a_sweep() {
        let dir = tempdir().unwrap();
        let repository = Arc::new(RecordingRepository::new());
        let manager = Arc::new(Manager::new(
            Arc::new(WithdrawnCluster),
            repository,
            Arc::new(NoopCypher),
            Arc::new(FieldPathSet::new()),
            dir.path().to_path_buf(),
            Duration::from_secs(60),
        ));

        let id = ResourceTypeId::new("", "v1", "configmaps");
        manager.start_missing(std::slice::from_ref(&id)).await;
        assert!(manager.watchers.read().await.contains_key(&id));

        // The supervisor task observes `ClusterError::NotFound` from
        // `watch()` asynchronously; poll briefly instead of assuming it
        // has already run by the time `start_missing` returns.
        for _ in 0..100 {
            if !manager.watchers.read().await.contains_key(&id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(
            !manager.watchers.read().await.contains_key(&id),
            "withdrawn watcher must be pruned without depending on the next discovery sweep"
        );
    }
}
