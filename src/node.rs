use std::sync::Arc;

use futures::future::RemoteHandle;
use futures::FutureExt;

use crate::broker::{BrokerInfo, TopologyManager};
use crate::config::GossamerConfig;
use crate::error::Result;
use crate::membership::codec::PartitionInfo;
use crate::membership::{Membership, MembershipBootstrap};
use crate::topology::distribution::{static_members, PartitionDistributor, RoundRobinDistributor};
use crate::topology::{ClusterTopologyManagerService, MemberId};
use crate::util::Shutdown;

/// One broker's membership layer: the partition leadership view, the gossip bootstrap and,
/// when enabled, the persisted cluster topology.
pub struct Node {
    config: GossamerConfig,
    topology_manager: TopologyManager,
    bootstrap: MembershipBootstrap,
    cluster_topology: Option<ClusterTopologyManagerService>,
    task: RemoteHandle<Result<()>>,
}

impl Node {
    #[tracing::instrument(skip_all, fields(node_id = config.cluster.node_id))]
    pub async fn start(
        config: GossamerConfig,
        membership: Arc<dyn Membership>,
        shutdown: Shutdown,
    ) -> Result<Self> {
        config.validate()?;

        let local = BrokerInfo::from_config(&config);
        let (topology_manager, actor) = TopologyManager::new(local, membership.clone())?;
        let (task, handle) = actor.run(shutdown.clone()).remote_handle();
        tokio::spawn(task);

        let cluster_topology = if config.topology.enabled {
            Some(ClusterTopologyManagerService::start(&config, shutdown).await?)
        } else {
            tracing::debug!("cluster topology manager disabled");
            None
        };

        let bootstrap = MembershipBootstrap::new(
            membership,
            config.node_info(),
            config.cluster.request_timeout,
        );
        bootstrap
            .join(config.cluster.initial_contact_points.clone())
            .await?;
        bootstrap.advertise_partitions(&local_partitions(&config)).await?;

        tracing::info!("node started");
        Ok(Self {
            config,
            topology_manager,
            bootstrap,
            cluster_topology,
            task: handle,
        })
    }

    pub fn config(&self) -> &GossamerConfig {
        &self.config
    }

    pub fn topology_manager(&self) -> &TopologyManager {
        &self.topology_manager
    }

    pub fn bootstrap(&self) -> &MembershipBootstrap {
        &self.bootstrap
    }

    /// The cluster topology service, `None` unless `topology.enabled` is set.
    pub fn cluster_topology(&self) -> Option<&ClusterTopologyManagerService> {
        self.cluster_topology.as_ref()
    }

    /// Leaves the cluster. The actors keep running until the shutdown signal fires.
    pub async fn stop(&self) -> Result<()> {
        self.bootstrap.leave().await
    }

    /// Waits for every actor of this node to stop after shutdown was signalled.
    pub async fn stopped(self) -> Result<()> {
        self.task.await?;
        if let Some(service) = self.cluster_topology {
            service.stopped().await?;
        }
        Ok(())
    }
}

/// Partitions the static distribution assigns to this node. Leadership is not known yet.
fn local_partitions(config: &GossamerConfig) -> Vec<PartitionInfo> {
    let cluster = &config.cluster;
    let local = MemberId::from_node_id(cluster.node_id);
    RoundRobinDistributor
        .distribute(
            &static_members(cluster.cluster_size),
            cluster.partitions_count,
            cluster.replication_factor,
        )
        .into_iter()
        .filter(|partition| partition.members.contains_key(&local))
        .map(|partition| PartitionInfo {
            partition_id: partition.id.0,
            replication_factor: cluster.replication_factor,
            is_leader: false,
        })
        .collect()
}
