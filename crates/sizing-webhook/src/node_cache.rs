//! Background node watcher and the capacity snapshot it maintains.
//!
//! The watcher keeps an in-memory map of every node's allocatable resources
//! warm; admission requests read it synchronously through the engine's
//! [`NodeCapacityProvider`] trait and never wait on the watch.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::time::Duration;

use error_stack::Report;
use error_stack::ResultExt;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::runtime::watcher::watcher;
use kube::runtime::watcher::Config;
use kube::runtime::WatchStreamExt;
use kube::Api;
use kube::Client;
use sizing::properties::ResourceName;
use sizing::NodeCapacityProvider;
use thiserror::Error;
use tokio::select;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

/// Errors that can occur while maintaining the node snapshot.
#[derive(Debug, Error)]
pub(crate) enum WatchError {
    #[error("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[error("Failed to watch nodes: {message}")]
    WatchFailed { message: String },
}

type CapacityMap = HashMap<String, BTreeMap<ResourceName, f64>>;

/// Shared, cheaply clonable handle onto the node capacity snapshot.
#[derive(Clone, Default)]
pub(crate) struct NodeCapacityCache {
    inner: Arc<RwLock<CapacityMap>>,
}

impl NodeCapacityCache {
    // Poisoning is survivable here: writers replace whole entries, so the
    // map is consistent even if a holder panicked mid-update.
    fn insert(&self, node_name: String, allocatable: BTreeMap<ResourceName, f64>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node_name, allocatable);
    }

    fn remove(&self, node_name: &str) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(node_name);
    }

    #[cfg(test)]
    pub(crate) fn insert_for_test(
        &self,
        node_name: &str,
        allocatable: BTreeMap<ResourceName, f64>,
    ) {
        self.insert(node_name.to_string(), allocatable);
    }
}

impl NodeCapacityProvider for NodeCapacityCache {
    fn node_allocatable(&self, node_name: &str) -> Option<BTreeMap<ResourceName, f64>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node_name)
            .cloned()
    }
}

/// Watches cluster nodes and mirrors their allocatable capacity into a
/// [`NodeCapacityCache`].
pub(crate) struct NodeWatcher {
    client: Client,
    cache: NodeCapacityCache,
}

impl NodeWatcher {
    /// Create a new node watcher.
    ///
    /// # Errors
    ///
    /// - [`WatchError::ConnectionFailed`] if unable to set up a Kubernetes
    ///   client
    pub(crate) async fn new(
        kubeconfig: Option<PathBuf>,
        cache: NodeCapacityCache,
    ) -> Result<Self, Report<WatchError>> {
        let client = match kubeconfig {
            Some(path) => {
                let kubeconfig =
                    Kubeconfig::read_from(&path).change_context(WatchError::ConnectionFailed {
                        message: format!("Cannot read kubeconfig at {}", path.display()),
                    })?;
                let config =
                    kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await
                        .change_context(WatchError::ConnectionFailed {
                            message: format!("Kubeconfig at {} is not usable", path.display()),
                        })?;
                Client::try_from(config).change_context(WatchError::ConnectionFailed {
                    message: "Cannot build client from kubeconfig".to_string(),
                })?
            }
            // In-cluster config, or ~/.kube/config outside
            None => Client::try_default()
                .await
                .change_context(WatchError::ConnectionFailed {
                    message: "Cannot infer cluster configuration".to_string(),
                })?,
        };

        Ok(Self { client, cache })
    }

    /// Run the watch until shutdown, restarting the stream on failure.
    pub(crate) async fn run(
        &self,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) -> Result<(), Report<WatchError>> {
        info!("Starting node watcher");

        loop {
            select! {
                _ = &mut shutdown_rx => {
                    info!("Node watcher shutdown requested");
                    break;
                }
                result = self.watch_nodes() => {
                    match result {
                        Ok(()) => {
                            warn!("Node watch stream ended unexpectedly, restarting...");
                        }
                        Err(e) => {
                            error!("Node watch failed: {e:?}");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Watch nodes and mirror events into the cache.
    ///
    /// # Errors
    ///
    /// - [`WatchError::WatchFailed`] if the watch stream errors out
    async fn watch_nodes(&self) -> Result<(), Report<WatchError>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let mut stream = watcher(api, Config::default()).applied_objects().boxed();

        while let Some(event) = stream.next().await {
            match event {
                Ok(node) => self.handle_node_event(node),
                Err(e) => {
                    return Err(Report::new(WatchError::WatchFailed {
                        message: format!("Watch stream error: {e}"),
                    }));
                }
            }
        }

        Ok(())
    }

    fn handle_node_event(&self, node: Node) {
        let Some(node_name) = node.metadata.name else {
            return;
        };

        if node.metadata.deletion_timestamp.is_some() {
            debug!(node = %node_name, "node deleted, dropping from snapshot");
            self.cache.remove(&node_name);
            return;
        }

        let declared = node
            .status
            .and_then(|status| status.allocatable)
            .unwrap_or_default();

        let mut allocatable = BTreeMap::new();
        for (resource, declared_quantity) in declared {
            match sizing::quantity::parse(&declared_quantity.0) {
                Ok(value) => {
                    allocatable.insert(ResourceName::from(resource), value);
                }
                Err(e) => {
                    // An unparseable capacity only drops that one resource
                    warn!(node = %node_name, resource = %resource, "skipping allocatable quantity: {e:?}");
                }
            }
        }

        debug!(node = %node_name, resources = allocatable.len(), "node snapshot updated");
        self.cache.insert(node_name, allocatable);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_reads_what_was_inserted() {
        let cache = NodeCapacityCache::default();
        cache.insert(
            "worker-1".to_string(),
            BTreeMap::from([(ResourceName::cpu(), 4.0)]),
        );

        let allocatable = cache.node_allocatable("worker-1").unwrap();
        assert_eq!(allocatable.get(&ResourceName::cpu()), Some(&4.0));
        assert!(cache.node_allocatable("worker-2").is_none());
    }

    #[test]
    fn cache_remove_forgets_the_node() {
        let cache = NodeCapacityCache::default();
        cache.insert("worker-1".to_string(), BTreeMap::new());
        cache.remove("worker-1");
        assert!(cache.node_allocatable("worker-1").is_none());
    }

    #[test]
    fn poisoned_lock_still_serves_reads_and_writes() {
        let cache = NodeCapacityCache::default();
        cache.insert(
            "worker-1".to_string(),
            BTreeMap::from([(ResourceName::cpu(), 2.0)]),
        );

        let poisoner = cache.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.inner.write().unwrap();
            panic!("poison the capacity lock");
        })
        .join();

        assert!(cache.node_allocatable("worker-1").is_some());
        cache.insert("worker-2".to_string(), BTreeMap::new());
        assert!(cache.node_allocatable("worker-2").is_some());
    }

    #[test]
    fn clones_share_the_snapshot() {
        let cache = NodeCapacityCache::default();
        let handle = cache.clone();
        cache.insert("worker-1".to_string(), BTreeMap::new());
        assert!(handle.node_allocatable("worker-1").is_some());
    }
}
