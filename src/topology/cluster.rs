use std::collections::BTreeMap;

use crate::topology::member::MemberState;
use crate::topology::{MemberId, TopologyError};

/// Pending reconfiguration of the cluster. Nothing produces changes yet, so the plan is always
/// empty; it exists so snapshots already carry the field.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterChangePlan {}

impl ClusterChangePlan {
    pub fn empty() -> Self {
        Self {}
    }
}

/// Immutable, versioned snapshot of all members and their partition assignments.
///
/// Only [`ClusterTopology::merge`] moves the topology version; adding or updating members keeps
/// it, and the member's own [`MemberState`] version records the change instead.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTopology {
    pub version: i64,
    pub members: BTreeMap<MemberId, MemberState>,
    pub changes: ClusterChangePlan,
}

impl ClusterTopology {
    pub fn init() -> Self {
        Self {
            version: 0,
            members: BTreeMap::new(),
            changes: ClusterChangePlan::empty(),
        }
    }

    pub fn add_member(&self, member_id: MemberId, state: MemberState) -> Result<Self, TopologyError> {
        if self.members.contains_key(&member_id) {
            return Err(TopologyError::MemberAlreadyExists(member_id));
        }

        let mut members = self.members.clone();
        members.insert(member_id, state);
        Ok(self.with_members(members))
    }

    pub fn update_member<F>(&self, member_id: &MemberId, f: F) -> Result<Self, TopologyError>
    where
        F: FnOnce(&MemberState) -> MemberState,
    {
        let current = self
            .members
            .get(member_id)
            .ok_or_else(|| TopologyError::MemberNotFound(member_id.clone()))?;

        let updated = f(current);
        let mut members = self.members.clone();
        members.insert(member_id.clone(), updated);
        Ok(self.with_members(members))
    }

    /// Joins two views of the topology. The version is the maximum of both sides and every member
    /// known to either side is kept; members present on both sides go through
    /// [`MemberState::merge`].
    pub fn merge(&self, other: &ClusterTopology) -> ClusterTopology {
        let mut members = self.members.clone();
        for (id, theirs) in &other.members {
            let merged = match members.get(id) {
                Some(ours) => ours.merge(theirs),
                None => theirs.clone(),
            };
            members.insert(id.clone(), merged);
        }

        ClusterTopology {
            version: self.version.max(other.version),
            members,
            changes: self.changes.clone(),
        }
    }

    pub fn get_member(&self, member_id: &MemberId) -> Option<&MemberState> {
        self.members.get(member_id)
    }

    pub fn has_member(&self, member_id: &MemberId) -> bool {
        self.members.contains_key(member_id)
    }

    pub fn members(&self) -> impl Iterator<Item = (&MemberId, &MemberState)> {
        self.members.iter()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// True for the value produced by [`ClusterTopology::init`] before anything was added.
    pub fn is_uninitialized(&self) -> bool {
        self.version == 0 && self.members.is_empty()
    }

    fn with_members(&self, members: BTreeMap<MemberId, MemberState>) -> Self {
        Self {
            version: self.version,
            members,
            changes: self.changes.clone(),
        }
    }
}

impl Default for ClusterTopology {
    fn default() -> Self {
        Self::init()
    }
}
