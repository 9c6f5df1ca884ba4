use std::collections::BTreeMap;

use crate::topology::partition::PartitionState;
use crate::topology::{PartitionId, TopologyError};

/// Lifecycle of a member within the cluster.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberStatus {
    Uninitialized,
    Joining,
    Active,
    Leaving,
    Left,
}

/// Versioned state of a single member. Every mutation returns a new value with the version
/// incremented by exactly one.
///
/// Transitions between lifecycle states are not validated: any state can move to any other, so
/// a member that has `Left` can become `Active` again.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberState {
    pub version: i64,
    pub state: MemberStatus,
    pub partitions: BTreeMap<PartitionId, PartitionState>,
}

impl MemberState {
    pub fn uninitialized() -> Self {
        Self {
            version: 0,
            state: MemberStatus::Uninitialized,
            partitions: BTreeMap::new(),
        }
    }

    /// State of a member created from static configuration at first boot.
    pub fn initialize_as_active(partitions: BTreeMap<PartitionId, PartitionState>) -> Self {
        Self {
            version: 0,
            state: MemberStatus::Active,
            partitions,
        }
    }

    pub fn to_joining(&self) -> Self {
        self.with_state(MemberStatus::Joining)
    }

    pub fn to_active(&self) -> Self {
        self.with_state(MemberStatus::Active)
    }

    pub fn to_leaving(&self) -> Self {
        self.with_state(MemberStatus::Leaving)
    }

    pub fn to_left(&self) -> Self {
        self.with_state(MemberStatus::Left)
    }

    pub fn add_partition(
        &self,
        partition_id: PartitionId,
        partition: PartitionState,
    ) -> Result<Self, TopologyError> {
        if self.partitions.contains_key(&partition_id) {
            return Err(TopologyError::PartitionAlreadyExists(partition_id));
        }

        let mut partitions = self.partitions.clone();
        partitions.insert(partition_id, partition);
        Ok(self.with_partitions(partitions))
    }

    pub fn update_partition<F>(&self, partition_id: PartitionId, f: F) -> Result<Self, TopologyError>
    where
        F: FnOnce(PartitionState) -> PartitionState,
    {
        let current = self
            .partitions
            .get(&partition_id)
            .copied()
            .ok_or(TopologyError::PartitionNotFound(partition_id))?;

        let mut partitions = self.partitions.clone();
        partitions.insert(partition_id, f(current));
        Ok(self.with_partitions(partitions))
    }

    pub fn remove_partition(&self, partition_id: PartitionId) -> Result<Self, TopologyError> {
        if !self.partitions.contains_key(&partition_id) {
            return Err(TopologyError::PartitionNotFound(partition_id));
        }

        let mut partitions = self.partitions.clone();
        partitions.remove(&partition_id);
        Ok(self.with_partitions(partitions))
    }

    pub fn get_partition(&self, partition_id: PartitionId) -> Option<&PartitionState> {
        self.partitions.get(&partition_id)
    }

    /// Whole-value last-writer-wins: the side with the strictly higher version replaces the other
    /// entirely, ties keep `self`. Partitions are not merged field by field. This is only correct
    /// while a member is the single writer of its own state.
    pub fn merge(&self, other: &MemberState) -> MemberState {
        if other.version > self.version {
            other.clone()
        } else {
            self.clone()
        }
    }

    fn with_state(&self, state: MemberStatus) -> Self {
        Self {
            version: self.version + 1,
            state,
            partitions: self.partitions.clone(),
        }
    }

    fn with_partitions(&self, partitions: BTreeMap<PartitionId, PartitionState>) -> Self {
        Self {
            version: self.version + 1,
            state: self.state,
            partitions,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{MemberState, MemberStatus};
    use crate::topology::partition::{PartitionState, PartitionStatus};
    use crate::topology::{PartitionId, TopologyError};

    #[test]
    fn transitions_increment_version() {
        let member = MemberState::uninitialized();
        let member = member.to_joining();
        assert_eq!(member.version, 1);
        assert_eq!(member.state, MemberStatus::Joining);

        let member = member.to_active().to_leaving().to_left();
        assert_eq!(member.version, 4);
        assert_eq!(member.state, MemberStatus::Left);
    }

    #[test]
    fn transitions_are_permissive() {
        let member = MemberState::uninitialized().to_left().to_active();
        assert_eq!(member.state, MemberStatus::Active);
        assert_eq!(member.version, 2);
    }

    #[test]
    fn partitions_copy_on_write() {
        let original = MemberState::initialize_as_active(BTreeMap::new());
        let updated = original
            .add_partition(PartitionId(1), PartitionState::active(2))
            .unwrap();

        assert!(original.partitions.is_empty());
        assert_eq!(updated.version, 1);
        assert_eq!(
            updated.get_partition(PartitionId(1)),
            Some(&PartitionState::active(2))
        );

        let updated = updated
            .update_partition(PartitionId(1), PartitionState::to_leaving)
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.partitions[&PartitionId(1)].state, PartitionStatus::Leaving);

        let updated = updated.remove_partition(PartitionId(1)).unwrap();
        assert_eq!(updated.version, 3);
        assert!(updated.partitions.is_empty());
    }

    #[test]
    fn partition_invariants() {
        let member = MemberState::uninitialized()
            .add_partition(PartitionId(1), PartitionState::active(1))
            .unwrap();

        assert_eq!(
            member.add_partition(PartitionId(1), PartitionState::active(1)),
            Err(TopologyError::PartitionAlreadyExists(PartitionId(1)))
        );
        assert_eq!(
            member.update_partition(PartitionId(2), |p| p),
            Err(TopologyError::PartitionNotFound(PartitionId(2)))
        );
        assert_eq!(
            member.remove_partition(PartitionId(2)),
            Err(TopologyError::PartitionNotFound(PartitionId(2)))
        );
    }

    #[test]
    fn merge_keeps_higher_version_whole() {
        let base = MemberState::uninitialized();
        let newer = base
            .add_partition(PartitionId(1), PartitionState::active(1))
            .unwrap()
            .to_active();
        let older = base
            .add_partition(PartitionId(2), PartitionState::active(1))
            .unwrap();

        let merged = older.merge(&newer);
        assert_eq!(merged, newer);
        assert!(!merged.partitions.contains_key(&PartitionId(2)));

        assert_eq!(newer.merge(&older), newer);
    }

    #[test]
    fn merge_tie_keeps_current() {
        let a = MemberState::uninitialized().to_active();
        let b = MemberState::uninitialized().to_leaving();
        assert_eq!(a.merge(&b), a);
        assert_eq!(b.merge(&a), b);
    }
}
