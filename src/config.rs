use std::path::PathBuf;
use std::time::Duration;

use crate::error::{GossamerError, Result};
use crate::membership::codec::{NodeInfo, SocketAddress, MAX_HOST_LENGTH};

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GossamerConfig {
    pub cluster: ClusterConfig,
    pub network: NetworkConfig,
    pub topology: TopologyConfig,
}

/// Static cluster parameters. Every node of a cluster must agree on the sizes, otherwise peers
/// refuse each other's broker info.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Id of this node, in `[0, cluster_size)`.
    pub node_id: i32,
    pub cluster_size: i32,
    pub partitions_count: i32,
    pub replication_factor: i32,
    /// Members to contact when joining. Empty makes this node the seed.
    pub initial_contact_points: Vec<String>,
    /// Deadline for every call into the membership protocol.
    pub request_timeout: Duration,
    /// Version advertised to peers.
    pub version: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            cluster_size: 1,
            partitions_count: 1,
            replication_factor: 1,
            initial_contact_points: vec![],
            request_timeout: Duration::from_secs(10),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub management_port: i32,
    pub client_port: i32,
    pub replication_port: i32,
    pub subscription_port: i32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            management_port: 26500,
            client_port: 26501,
            replication_port: 26502,
            subscription_port: 26503,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// The persisted topology format is not final, so the manager only runs when asked to.
    pub enabled: bool,
    pub directory: PathBuf,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from("data").join("topology"),
        }
    }
}

impl GossamerConfig {
    /// Validates the configuration, ensuring all values make sense.
    pub fn validate(&self) -> Result<()> {
        let cluster = &self.cluster;
        if cluster.cluster_size < 1 {
            return Err(invalid("cluster size must be at least 1"));
        }
        if cluster.partitions_count < 1 {
            return Err(invalid("partitions count must be at least 1"));
        }
        if cluster.replication_factor < 1 {
            return Err(invalid("replication factor must be at least 1"));
        }
        if cluster.replication_factor > cluster.cluster_size {
            return Err(invalid("replication factor cannot exceed cluster size"));
        }
        if cluster.node_id < 0 || cluster.node_id >= cluster.cluster_size {
            return Err(invalid("node id must be in [0, cluster size)"));
        }
        if cluster.request_timeout.is_zero() {
            return Err(invalid("request timeout must not be zero"));
        }
        if self.network.host.len() > MAX_HOST_LENGTH {
            return Err(invalid("host is too long"));
        }

        Ok(())
    }

    /// Identity gossiped to peers on join.
    pub fn node_info(&self) -> NodeInfo {
        let address = |port| SocketAddress::new(self.network.host.clone(), port);
        NodeInfo {
            node_id: self.cluster.node_id,
            management_api: address(self.network.management_port),
            client_api: address(self.network.client_port),
            replication_api: address(self.network.replication_port),
            subscription_api: address(self.network.subscription_port),
        }
    }
}

fn invalid(msg: &str) -> GossamerError {
    GossamerError::Config {
        error_msg: msg.to_string(),
    }
}

pub fn config<P: AsRef<std::path::Path>>(config_path: P) -> Result<GossamerConfig> {
    let config = config::Config::builder()
        .add_source(config::File::from(config_path.as_ref()))
        .add_source(config::Environment::with_prefix("GOSSAMER").separator("__"))
        .build()?;

    Ok(config.try_deserialize()?)
}
