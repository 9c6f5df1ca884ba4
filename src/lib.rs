pub mod broker;
pub mod config;
pub mod error;
pub mod logger;
pub mod membership;
pub mod node;
pub mod topology;
pub mod util;

use std::sync::Arc;

use crate::membership::local::LocalCluster;
use crate::node::Node;
use crate::topology::MemberId;
use crate::util::Shutdown;

#[macro_use]
extern crate serde_derive;

/// Runs a single node from the configuration at `config_path` on an in-process membership
/// cluster until `shutdown` fires, then leaves the cluster.
pub async fn gossamer<P: AsRef<std::path::Path>>(
    config_path: P,
    mut shutdown: Shutdown,
) -> anyhow::Result<()> {
    let config = crate::config::config(config_path)?;

    // the cluster outlives the node so that leaving still reaches it
    let cluster_shutdown = Shutdown::new();
    let cluster = LocalCluster::start(cluster_shutdown.clone());
    let membership = Arc::new(cluster.member(MemberId::from_node_id(config.cluster.node_id)));

    let node = Node::start(config, membership, shutdown.clone()).await?;
    shutdown.wait().await;

    if let Err(err) = node.stop().await {
        tracing::warn!(%err, "could not leave the cluster");
    }
    node.stopped().await?;
    cluster_shutdown.shutdown();
    Ok(())
}
