use crate::broker::BrokerInfo;
use crate::topology::PartitionId;

/// Receives partition leader changes from a [`crate::broker::TopologyManager`].
///
/// Callbacks run on the manager's actor, one at a time. An error or a panic in one listener is
/// logged and does not affect delivery to the others.
pub trait TopologyPartitionListener: Send + Sync {
    fn on_partition_leader_updated(
        &self,
        partition_id: PartitionId,
        leader: &BrokerInfo,
    ) -> anyhow::Result<()>;
}

impl<F> TopologyPartitionListener for F
where
    F: Fn(PartitionId, &BrokerInfo) -> anyhow::Result<()> + Send + Sync,
{
    fn on_partition_leader_updated(
        &self,
        partition_id: PartitionId,
        leader: &BrokerInfo,
    ) -> anyhow::Result<()> {
        self(partition_id, leader)
    }
}
