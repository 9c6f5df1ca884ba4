//! Live view of partition leadership. Every node publishes its [`BrokerInfo`] into the
//! membership protocol's metadata, and the [`TopologyManager`] of every other node folds those
//! into a partition to leader cache, keeping the claim with the highest term.

pub mod info;
pub mod listener;
pub mod manager;

pub use info::{BrokerInfo, PartitionHealth, PartitionRole};
pub use listener::TopologyPartitionListener;
pub use manager::TopologyManager;

/// A term serves as a logical clock for the leadership of one partition, a higher term always
/// supersedes a lower one.
pub type Term = u64;
