use std::collections::BTreeMap;

use bytes::Bytes;

use crate::broker::Term;
use crate::config::GossamerConfig;
use crate::error::Result;
use crate::membership::Member;
use crate::topology::PartitionId;

/// Key of the broker info in a member's property bag.
pub const BROKER_INFO_PROPERTY: &str = "brokerInfo";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionRole {
    Leader { term: Term },
    Follower,
    Inactive,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionHealth {
    Healthy,
    Unhealthy,
}

/// Static parameters and current partition roles of one broker, as gossiped to its peers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerInfo {
    pub node_id: i32,
    pub cluster_size: i32,
    pub partitions_count: i32,
    pub replication_factor: i32,
    pub version: String,
    pub client_address: String,
    pub partition_roles: BTreeMap<PartitionId, PartitionRole>,
    pub partition_health: BTreeMap<PartitionId, PartitionHealth>,
}

impl BrokerInfo {
    pub fn new(node_id: i32, cluster_size: i32, partitions_count: i32, replication_factor: i32) -> Self {
        Self {
            node_id,
            cluster_size,
            partitions_count,
            replication_factor,
            version: env!("CARGO_PKG_VERSION").to_string(),
            client_address: String::new(),
            partition_roles: BTreeMap::new(),
            partition_health: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &GossamerConfig) -> Self {
        let cluster = &config.cluster;
        Self {
            version: cluster.version.clone(),
            client_address: format!("{}:{}", config.network.host, config.network.client_port),
            ..Self::new(
                cluster.node_id,
                cluster.cluster_size,
                cluster.partitions_count,
                cluster.replication_factor,
            )
        }
    }

    pub fn set_leader(&mut self, partition_id: PartitionId, term: Term) {
        self.partition_roles
            .insert(partition_id, PartitionRole::Leader { term });
    }

    pub fn set_follower(&mut self, partition_id: PartitionId) {
        self.partition_roles
            .insert(partition_id, PartitionRole::Follower);
    }

    pub fn set_inactive(&mut self, partition_id: PartitionId) {
        self.partition_roles
            .insert(partition_id, PartitionRole::Inactive);
    }

    pub fn set_health(&mut self, partition_id: PartitionId, health: PartitionHealth) {
        self.partition_health.insert(partition_id, health);
    }

    pub fn role(&self, partition_id: PartitionId) -> Option<PartitionRole> {
        self.partition_roles.get(&partition_id).copied()
    }

    /// Term of this broker's leadership of `partition_id`, if it claims to lead it.
    pub fn leader_term(&self, partition_id: PartitionId) -> Option<Term> {
        match self.role(partition_id) {
            Some(PartitionRole::Leader { term }) => Some(term),
            _ => None,
        }
    }

    /// Partitions this broker claims to lead, with the claimed term.
    pub fn leader_partitions(&self) -> impl Iterator<Item = (PartitionId, Term)> + '_ {
        self.partition_roles
            .iter()
            .filter_map(|(partition_id, role)| match role {
                PartitionRole::Leader { term } => Some((*partition_id, *term)),
                _ => None,
            })
    }

    pub fn is_healthy(&self, partition_id: PartitionId) -> bool {
        !matches!(
            self.partition_health.get(&partition_id),
            Some(PartitionHealth::Unhealthy)
        )
    }

    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(buf)?)
    }

    /// Broker info advertised by `member`, or `None` if it advertises none.
    pub fn from_member(member: &Member) -> Result<Option<Self>> {
        member
            .property(BROKER_INFO_PROPERTY)
            .map(|bytes| Self::decode(bytes))
            .transpose()
    }
}
