//! The static side of cluster membership: which members exist and which partitions each of them
//! is assigned, independent of who currently leads a partition.
//!
//! A [`ClusterTopology`] is a versioned value. Each [`MemberState`] inside it is owned by exactly
//! one member, which is the only node that ever mutates it; other nodes learn about it through
//! [`ClusterTopology::merge`]. The canonical copy for a node is held by the
//! [`ClusterTopologyManager`] actor and persisted through [`PersistedClusterTopology`].

use derive_more::Display;

pub mod cluster;
pub mod distribution;
pub mod manager;
pub mod member;
pub mod partition;
pub mod persisted;
pub mod service;

pub use cluster::{ClusterChangePlan, ClusterTopology};
pub use manager::ClusterTopologyManager;
pub use member::{MemberState, MemberStatus};
pub use partition::{PartitionState, PartitionStatus};
pub use persisted::PersistedClusterTopology;
pub use service::ClusterTopologyManagerService;

/// Opaque identifier of a member in the membership protocol.
#[derive(
    Clone, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MemberId(pub String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        MemberId(id.into())
    }

    /// Member id used for a broker with the given numeric node id.
    pub fn from_node_id(node_id: i32) -> Self {
        MemberId(node_id.to_string())
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        MemberId::new(id)
    }
}

#[derive(
    Copy, Clone, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PartitionId(pub i32);

/// Raised when a caller breaks one of the copy-on-write invariants of the topology values. These
/// indicate a bug in the caller and are never recovered from silently.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("member {0} already exists in the topology")]
    MemberAlreadyExists(MemberId),
    #[error("member {0} does not exist in the topology")]
    MemberNotFound(MemberId),
    #[error("partition {0} is already assigned to this member")]
    PartitionAlreadyExists(PartitionId),
    #[error("partition {0} is not assigned to this member")]
    PartitionNotFound(PartitionId),
}
