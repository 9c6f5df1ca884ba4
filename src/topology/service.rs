use futures::future::RemoteHandle;
use futures::FutureExt;

use crate::config::GossamerConfig;
use crate::error::Result;
use crate::topology::{ClusterTopology, ClusterTopologyManager, PersistedClusterTopology};
use crate::util::Shutdown;

/// Runs a [`ClusterTopologyManager`] for the lifetime of a node. Only started when
/// `topology.enabled` is set.
pub struct ClusterTopologyManagerService {
    manager: ClusterTopologyManager,
    topology: ClusterTopology,
    task: RemoteHandle<Result<()>>,
}

impl ClusterTopologyManagerService {
    /// Opens the snapshot store, spawns the manager and starts it. Failing to open the store and
    /// failing to start the manager both surface as the returned error; in either case the node
    /// has no topology and must not continue.
    #[tracing::instrument(skip_all, fields(directory = ?config.topology.directory))]
    pub async fn start(config: &GossamerConfig, shutdown: Shutdown) -> Result<Self> {
        let directory = config.topology.directory.clone();
        let persisted =
            tokio::task::spawn_blocking(move || PersistedClusterTopology::open(directory)).await??;

        let (manager, actor) = ClusterTopologyManager::new(persisted);
        let (task, handle) = actor.run(shutdown).remote_handle();
        tokio::spawn(task);

        let topology = manager.start(config.cluster.clone()).await?;
        tracing::info!(version = topology.version, "cluster topology manager started");
        Ok(Self {
            manager,
            topology,
            task: handle,
        })
    }

    pub fn manager(&self) -> &ClusterTopologyManager {
        &self.manager
    }

    /// Topology as it was when the service started.
    pub fn initial_topology(&self) -> &ClusterTopology {
        &self.topology
    }

    /// Waits for the manager to stop after the node's shutdown signal fired.
    pub async fn stopped(self) -> Result<()> {
        self.task.await
    }
}
