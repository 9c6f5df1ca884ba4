use std::collections::BTreeMap;

use crate::topology::{MemberId, PartitionId};

/// The first partition id handed out by a distributor.
pub const START_PARTITION_ID: i32 = 1;

/// Replica group of one partition as computed from static configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionMetadata {
    pub id: PartitionId,
    /// Members of the replica group with their election priority.
    pub members: BTreeMap<MemberId, i32>,
    /// Member expected to lead the partition, it has the highest priority.
    pub primary: MemberId,
}

pub trait PartitionDistributor: Send + Sync {
    fn distribute(
        &self,
        members: &[MemberId],
        partitions_count: i32,
        replication_factor: i32,
    ) -> Vec<PartitionMetadata>;
}

/// Assigns each partition to `replication_factor` consecutive members, starting one member
/// further along the ring for every partition.
#[derive(Clone, Copy, Debug, Default)]
pub struct RoundRobinDistributor;

impl PartitionDistributor for RoundRobinDistributor {
    fn distribute(
        &self,
        members: &[MemberId],
        partitions_count: i32,
        replication_factor: i32,
    ) -> Vec<PartitionMetadata> {
        if members.is_empty() {
            return vec![];
        }

        let group_size = (replication_factor.max(0) as usize).min(members.len());
        (0..partitions_count.max(0))
            .map(|offset| {
                let id = PartitionId(START_PARTITION_ID + offset);
                let group: BTreeMap<MemberId, i32> = (0..group_size)
                    .map(|k| {
                        let member = &members[(offset as usize + k) % members.len()];
                        (member.clone(), (group_size - k) as i32)
                    })
                    .collect();
                let primary = members[offset as usize % members.len()].clone();

                PartitionMetadata {
                    id,
                    members: group,
                    primary,
                }
            })
            .collect()
    }
}

/// Member ids of a statically configured cluster: node ids `0..cluster_size`.
pub fn static_members(cluster_size: i32) -> Vec<MemberId> {
    (0..cluster_size).map(MemberId::from_node_id).collect()
}
