/// Lifecycle of a partition replica on a member.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionStatus {
    Joining,
    Active,
    Leaving,
}

/// Static assignment of a partition to a member. The priority is handed to the replication
/// protocol when it forms the partition's replica group; it says nothing about who leads the
/// partition right now.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionState {
    pub state: PartitionStatus,
    pub priority: i32,
}

impl PartitionState {
    pub fn active(priority: i32) -> Self {
        Self {
            state: PartitionStatus::Active,
            priority,
        }
    }

    pub fn joining(priority: i32) -> Self {
        Self {
            state: PartitionStatus::Joining,
            priority,
        }
    }

    pub fn to_active(self) -> Self {
        Self {
            state: PartitionStatus::Active,
            ..self
        }
    }

    pub fn to_leaving(self) -> Self {
        Self {
            state: PartitionStatus::Leaving,
            ..self
        }
    }
}
