use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};

use tokio::sync::{mpsc, oneshot};

use crate::config::ClusterConfig;
use crate::error::Result;
use crate::topology::distribution::{static_members, PartitionDistributor, RoundRobinDistributor};
use crate::topology::{
    ClusterTopology, MemberId, MemberState, PartitionId, PartitionState, PersistedClusterTopology,
};
use crate::util::Shutdown;

/// Capacity of the manager's inbox.
const INBOX_CAPACITY: usize = 64;

#[derive(Debug)]
enum Command {
    Start {
        config: ClusterConfig,
        tx: oneshot::Sender<Result<ClusterTopology>>,
    },
    GetTopology {
        tx: oneshot::Sender<Option<ClusterTopology>>,
    },
}

/// Handle to the actor owning this node's canonical [`ClusterTopology`]. Every call is queued on
/// the actor and runs after all previously submitted calls.
#[derive(Clone, Debug)]
pub struct ClusterTopologyManager {
    tx: mpsc::Sender<Command>,
}

impl ClusterTopologyManager {
    /// Creates the handle and the actor that serves it. The actor does nothing until it is run.
    pub fn new(persisted: PersistedClusterTopology) -> (Self, ClusterTopologyManagerActor) {
        Self::with_distributor(persisted, Box::new(RoundRobinDistributor))
    }

    pub fn with_distributor(
        persisted: PersistedClusterTopology,
        distributor: Box<dyn PartitionDistributor>,
    ) -> (Self, ClusterTopologyManagerActor) {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let actor = ClusterTopologyManagerActor {
            rx,
            persisted,
            distributor,
            initialized: false,
        };
        (Self { tx }, actor)
    }

    /// Makes sure a topology exists, computing and persisting one from `config` on first boot.
    /// Calling it again, or restarting with a different configuration, keeps the stored topology.
    pub async fn start(&self, config: ClusterConfig) -> Result<ClusterTopology> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Command::Start { config, tx }).await?;
        rx.await?
    }

    pub async fn get_cluster_topology(&self) -> Result<Option<ClusterTopology>> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Command::GetTopology { tx }).await?;
        Ok(rx.await?)
    }
}

pub struct ClusterTopologyManagerActor {
    rx: mpsc::Receiver<Command>,
    persisted: PersistedClusterTopology,
    distributor: Box<dyn PartitionDistributor>,
    initialized: bool,
}

impl Debug for ClusterTopologyManagerActor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClusterTopologyManagerActor {{ {:?} }}", self.persisted)
    }
}

impl ClusterTopologyManagerActor {
    pub async fn run(mut self, mut shutdown: Shutdown) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,

                cmd = self.rx.recv() => match cmd {
                    Some(Command::Start { config, tx }) => {
                        let _ = tx.send(self.start(config).await);
                    }
                    Some(Command::GetTopology { tx }) => {
                        let _ = tx.send(self.persisted.get_topology().cloned());
                    }
                    None => break,
                },
            }
        }

        tracing::debug!("topology manager stopped");
        Ok(())
    }

    #[tracing::instrument(skip(config), fields(node_id = config.node_id))]
    async fn start(&mut self, config: ClusterConfig) -> Result<ClusterTopology> {
        if !self.initialized {
            self.persisted.initialize().await?;
            self.initialized = true;
        }

        if let Some(topology) = self.persisted.get_topology() {
            tracing::debug!(version = topology.version, "using persisted topology");
            return Ok(topology.clone());
        }

        let topology = self.generate(&config)?;
        tracing::info!(members = topology.member_count(), "initialized topology from configuration");
        self.persisted.update(topology.clone()).await?;
        Ok(topology)
    }

    fn generate(&self, config: &ClusterConfig) -> Result<ClusterTopology> {
        let members = static_members(config.cluster_size);
        let distribution = self.distributor.distribute(
            &members,
            config.partitions_count,
            config.replication_factor,
        );

        let mut assignments: BTreeMap<MemberId, BTreeMap<PartitionId, PartitionState>> = members
            .iter()
            .map(|member| (member.clone(), BTreeMap::new()))
            .collect();
        for partition in distribution {
            for (member, priority) in partition.members {
                assignments
                    .entry(member)
                    .or_default()
                    .insert(partition.id, PartitionState::active(priority));
            }
        }

        let mut topology = ClusterTopology::init();
        for (member, partitions) in assignments {
            topology = topology.add_member(member, MemberState::initialize_as_active(partitions))?;
        }
        Ok(topology)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;
    use tokio::task::JoinHandle;

    use super::ClusterTopologyManager;
    use crate::config::ClusterConfig;
    use crate::error::Result;
    use crate::topology::{
        MemberId, MemberStatus, PartitionId, PartitionState, PersistedClusterTopology,
    };
    use crate::util::Shutdown;

    fn config(cluster_size: i32, partitions_count: i32, replication_factor: i32) -> ClusterConfig {
        ClusterConfig {
            cluster_size,
            partitions_count,
            replication_factor,
            ..Default::default()
        }
    }

    fn spawn(
        dir: &std::path::Path,
        shutdown: &Shutdown,
    ) -> (ClusterTopologyManager, JoinHandle<Result<()>>) {
        let persisted = PersistedClusterTopology::open(dir).unwrap();
        let (manager, actor) = ClusterTopologyManager::new(persisted);
        (manager, tokio::spawn(actor.run(shutdown.clone())))
    }

    #[tokio::test]
    async fn generates_topology_on_first_start() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let shutdown = Shutdown::new();
        let (manager, actor) = spawn(dir.path(), &shutdown);

        assert!(manager.get_cluster_topology().await?.is_none());

        let topology = manager.start(config(3, 3, 2)).await?;
        assert_eq!(topology.version, 0);
        assert_eq!(topology.member_count(), 3);
        for (_, member) in topology.members() {
            assert_eq!(member.state, MemberStatus::Active);
            assert_eq!(member.partitions.len(), 2);
        }

        let first = topology.get_member(&MemberId::from("0")).unwrap();
        assert_eq!(first.partitions[&PartitionId(1)], PartitionState::active(2));
        assert_eq!(first.partitions[&PartitionId(3)], PartitionState::active(1));

        assert_eq!(manager.get_cluster_topology().await?, Some(topology));
        shutdown.shutdown();
        actor.await??;
        Ok(())
    }

    #[tokio::test]
    async fn start_is_idempotent() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let shutdown = Shutdown::new();
        let (manager, actor) = spawn(dir.path(), &shutdown);

        let first = manager.start(config(3, 3, 2)).await?;
        let second = manager.start(config(5, 8, 3)).await?;
        assert_eq!(first, second);
        shutdown.shutdown();
        actor.await??;
        Ok(())
    }

    #[tokio::test]
    async fn configuration_change_is_not_applied_after_restart() -> anyhow::Result<()> {
        let dir = tempdir()?;

        let shutdown = Shutdown::new();
        let (manager, actor) = spawn(dir.path(), &shutdown);
        let first = manager.start(config(2, 2, 1)).await?;
        shutdown.shutdown();
        actor.await??;

        let shutdown = Shutdown::new();
        let (manager, actor) = spawn(dir.path(), &shutdown);
        let second = manager.start(config(4, 8, 3)).await?;
        assert_eq!(first, second);
        assert_eq!(second.member_count(), 2);
        shutdown.shutdown();
        actor.await??;
        Ok(())
    }

    #[tokio::test]
    async fn closed_manager_fails_calls() {
        let dir = tempdir().unwrap();
        let persisted = PersistedClusterTopology::open(dir.path()).unwrap();
        let (manager, actor) = ClusterTopologyManager::new(persisted);
        drop(actor);

        assert!(manager.start(config(1, 1, 1)).await.is_err());
        assert!(manager.get_cluster_topology().await.is_err());
    }
}
