//! Production `ClusterClient` backed by `kube`'s dynamic API.
//!
//! Discovery enumerates every group/version's resources and keeps the ones
//! whose capabilities report the "watch" verb. LIST and
//! WATCH both go through the dynamic `Api<DynamicObject>` so that we never
//! need compiled types for the resource kinds we mirror — the whole point
//! of this system is that it works for arbitrary, discovered types.

use async_trait::async_trait;
use futures_util::StreamExt;
use kube::api::{Api, ApiResource, DynamicObject, ListParams, WatchEvent as KubeWatchEvent, WatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::Discovery;
use kube::{Client, Config};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dump_core::traits::{ClusterError, WatchEvent, WatchEventKind};
use dump_core::{ResourceObject, ResourceTypeId};

/// Channel capacity for forwarded watch events. Small: the Watcher commits
/// one event at a time, so this is backpressure, not buffering for speed.
const WATCH_CHANNEL_CAPACITY: usize = 16;

pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Builds a client using the in-cluster service account when running
    /// inside a pod, falling back to `$HOME/.kube/config` otherwise.
    pub async fn new() -> Result<Self, ClusterError> {
        let config = match Config::incluster() {
            Ok(config) => {
                tracing::info!("using in-cluster client configuration");
                config
            }
            Err(in_cluster_err) => {
                tracing::info!("no in-cluster configuration, falling back to kubeconfig");
                let home = std::env::var("HOME")
                    .map_err(|_| ClusterError::Discovery(format!("HOME not set and in-cluster config failed: {in_cluster_err}")))?;
                let kubeconfig_path = std::path::Path::new(&home).join(".kube").join("config");
                let kubeconfig = Kubeconfig::read_from(&kubeconfig_path).map_err(|e| {
                    ClusterError::Discovery(format!(
                        "failed to load cluster config: [in: {in_cluster_err}, out: {e}]"
                    ))
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| {
                        ClusterError::Discovery(format!(
                            "failed to load cluster config: [in: {in_cluster_err}, out: {e}]"
                        ))
                    })?
            }
        };

        let client = Client::try_from(config).map_err(|e| ClusterError::Discovery(e.to_string()))?;
        Ok(Self { client })
    }

    fn api_resource_for(id: &ResourceTypeId) -> ApiResource {
        ApiResource {
            group: id.group.clone(),
            version: id.version.clone(),
            api_version: if id.group.is_empty() {
                id.version.clone()
            } else {
                format!("{}/{}", id.group, id.version)
            },
            kind: id.resource.clone(),
            plural: id.resource.clone(),
        }
    }
}

#[async_trait]
impl dump_core::ClusterClient for KubeClusterClient {
    async fn discover(&self) -> Result<Vec<ResourceTypeId>, ClusterError> {
        let discovery = Discovery::new(self.client.clone())
            .run()
            .await
            .map_err(|e| ClusterError::Discovery(e.to_string()))?;

        let mut ids = Vec::new();
        for group in discovery.groups() {
            for (resource, capabilities) in group.recommended_resources() {
                if capabilities.supports_operation("watch") {
                    ids.push(ResourceTypeId::new(
                        resource.group.clone(),
                        resource.version.clone(),
                        resource.plural.clone(),
                    ));
                }
            }
        }
        Ok(ids)
    }

    async fn list(&self, id: &ResourceTypeId) -> Result<Vec<ResourceObject>, ClusterError> {
        let ar = Self::api_resource_for(id);
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        let list = api.list(&ListParams::default()).await.map_err(|e| classify(id, e))?;

        list.items
            .into_iter()
            .map(|item| ResourceObject::from_value(serde_json::to_value(item).unwrap_or_default()).map_err(ClusterError::from))
            .collect()
    }

    async fn watch(
        &self,
        id: &ResourceTypeId,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Result<WatchEvent, ClusterError>>, ClusterError> {
        let ar = Self::api_resource_for(id);
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        let mut stream = api.watch(&WatchParams::default(), "0").await.map_err(|e| classify(id, e))?.boxed();

        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let id = id.clone();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    item = stream.next() => item,
                };
                let Some(item) = next else { break };
                let event = match item {
                    Ok(KubeWatchEvent::Added(obj)) => to_domain_event(WatchEventKind::Added, obj),
                    Ok(KubeWatchEvent::Modified(obj)) => to_domain_event(WatchEventKind::Modified, obj),
                    Ok(KubeWatchEvent::Deleted(obj)) => to_domain_event(WatchEventKind::Deleted, obj),
                    Ok(KubeWatchEvent::Bookmark(_)) => continue,
                    Ok(KubeWatchEvent::Error(status)) => {
                        Err(ClusterError::Watch(id.to_string(), status.message.unwrap_or_default()))
                    }
                    Err(e) => Err(classify(&id, e)),
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}

fn to_domain_event(kind: WatchEventKind, obj: DynamicObject) -> Result<WatchEvent, ClusterError> {
    let object = ResourceObject::from_value(serde_json::to_value(obj).unwrap_or_default())?;
    Ok(WatchEvent { kind, object })
}

/// Maps a `kube::Error` to our domain error, recognizing the "resource
/// withdrawn" condition (HTTP 404) as non-fatal rather than bubbling
/// everything as a generic failure.
fn classify(id: &ResourceTypeId, err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => ClusterError::NotFound(id.to_string()),
        kube::Error::Api(resp) => ClusterError::Watch(id.to_string(), resp.message),
        other => ClusterError::Watch(id.to_string(), other.to_string()),
    }
}
