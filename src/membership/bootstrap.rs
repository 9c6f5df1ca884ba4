use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::error::Result;
use crate::membership::codec::{self, NodeInfo, PartitionInfo};
use crate::membership::Membership;
use crate::util::with_timeout;

/// Custom gossip event carrying a node's [`NodeInfo`].
pub const NODE_INFO_EVENT_TYPE: &str = "node-info";
/// Custom gossip event carrying a node's partition list.
pub const PARTITIONS_EVENT_TYPE: &str = "partitions";

/// Joins and leaves the gossip cluster on behalf of the local node.
#[derive(Debug)]
pub struct MembershipBootstrap {
    membership: Arc<dyn Membership>,
    node_info: NodeInfo,
    request_timeout: Duration,
}

impl MembershipBootstrap {
    pub fn new(
        membership: Arc<dyn Membership>,
        node_info: NodeInfo,
        request_timeout: Duration,
    ) -> Self {
        Self {
            membership,
            node_info,
            request_timeout,
        }
    }

    /// Publishes the local identity and joins. The identity goes out before the join so that the
    /// first gossip round already carries it. Without contact points the node is the seed and
    /// waits to be contacted.
    #[tracing::instrument(skip(self), fields(node_id = self.node_info.node_id))]
    pub async fn join(&self, initial_contact_points: Vec<String>) -> Result<()> {
        let payload = self.node_info.encode()?;
        with_timeout(
            "publish node info",
            self.request_timeout,
            self.membership.publish(NODE_INFO_EVENT_TYPE, payload),
        )
        .await?;

        if initial_contact_points.is_empty() {
            tracing::info!("no contact points configured, bootstrapping as seed");
        } else {
            tracing::info!(?initial_contact_points, "joining cluster");
        }

        with_timeout(
            "join",
            self.request_timeout,
            self.membership.join(initial_contact_points),
        )
        .await
    }

    #[tracing::instrument(skip(self), fields(node_id = self.node_info.node_id))]
    pub async fn leave(&self) -> Result<()> {
        tracing::info!("leaving cluster");
        with_timeout("leave", self.request_timeout, self.membership.leave()).await
    }

    /// Gossips which partitions this node replicates and which of them it leads.
    pub async fn advertise_partitions(&self, partitions: &[PartitionInfo]) -> Result<()> {
        let payload = codec::encode_partitions(partitions)?;
        with_timeout(
            "publish partitions",
            self.request_timeout,
            self.membership.publish(PARTITIONS_EVENT_TYPE, payload),
        )
        .await
    }

    /// Contact information of peers as their identity events arrive. Events that do not decode
    /// are logged and skipped.
    pub fn discovered_nodes(&self) -> Result<UnboundedReceiver<NodeInfo>> {
        let mut events = self.membership.subscribe_gossip(NODE_INFO_EVENT_TYPE)?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match NodeInfo::decode(&event.payload) {
                    Ok(info) => {
                        tracing::debug!(from = %event.from, ?info, "discovered node");
                        if tx.send(info).is_err() {
                            break;
                        }
                    }
                    Err(err) => tracing::warn!(from = %event.from, %err, "undecodable node info"),
                }
            }
        });
        Ok(rx)
    }

    /// Partition lists advertised by peers.
    pub fn advertised_partitions(&self) -> Result<UnboundedReceiver<Vec<PartitionInfo>>> {
        let mut events = self.membership.subscribe_gossip(PARTITIONS_EVENT_TYPE)?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match codec::decode_partitions(&event.payload) {
                    Ok(partitions) => {
                        if tx.send(partitions).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(from = %event.from, %err, "undecodable partition list")
                    }
                }
            }
        });
        Ok(rx)
    }
}
