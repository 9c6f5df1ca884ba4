//! Contract of the external gossip membership protocol, plus the pieces of this crate that sit
//! directly on top of it: the binary identity codec and the join/leave bootstrap.
//!
//! The protocol itself is a collaborator. [`local::LocalCluster`] provides an in-process
//! implementation used for single-process clusters and tests.

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::Result;
use crate::topology::MemberId;

pub mod bootstrap;
pub mod codec;
pub mod local;

pub use bootstrap::MembershipBootstrap;

/// A member as seen through the membership protocol: its id and its replicated property bag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    pub id: MemberId,
    pub properties: BTreeMap<String, Bytes>,
}

impl Member {
    pub fn new(id: MemberId) -> Self {
        Self {
            id,
            properties: BTreeMap::new(),
        }
    }

    pub fn property(&self, key: &str) -> Option<&Bytes> {
        self.properties.get(key)
    }
}

/// Change in cluster membership, always about one member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MembershipEvent {
    MemberAdded(Member),
    MetadataChanged(Member),
    MemberRemoved(Member),
    ReachabilityChanged { member: Member, reachable: bool },
}

impl MembershipEvent {
    pub fn member(&self) -> &Member {
        match self {
            MembershipEvent::MemberAdded(member)
            | MembershipEvent::MetadataChanged(member)
            | MembershipEvent::MemberRemoved(member)
            | MembershipEvent::ReachabilityChanged { member, .. } => member,
        }
    }
}

/// A custom event gossiped by a member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GossipEvent {
    pub from: MemberId,
    pub payload: Bytes,
}

/// Handle of the local member on the membership protocol.
///
/// Property updates are local and only scheduled for dissemination, so they do not suspend.
/// `join`, `leave` and `publish` talk to the protocol and may take arbitrarily long; callers in
/// this crate bound them with a deadline.
#[async_trait]
pub trait Membership: Send + Sync + Debug {
    fn local_member_id(&self) -> &MemberId;

    /// Stream of membership events about other members.
    fn subscribe(&self) -> Result<UnboundedReceiver<MembershipEvent>>;

    /// Stream of custom events of `event_type` published by other members.
    fn subscribe_gossip(&self, event_type: &str) -> Result<UnboundedReceiver<GossipEvent>>;

    /// Sets a property in the local member's bag, replicated to peers as metadata.
    fn set_local_property(&self, key: &str, value: Bytes) -> Result<()>;

    async fn publish(&self, event_type: &str, payload: Bytes) -> Result<()>;

    async fn join(&self, contact_points: Vec<String>) -> Result<()>;

    async fn leave(&self) -> Result<()>;
}
