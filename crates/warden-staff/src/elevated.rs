// elevated.rs - Where the elevated group's membership comes from.

use std::collections::BTreeSet;

use crate::error::StaffError;

/// Current membership of the externally managed elevated group.
pub trait ElevatedGroupSource: Send + Sync {
    fn members(&self) -> Result<BTreeSet<u64>, StaffError>;
}

/// A fixed membership list, typically from `[authority] elevated_group`.
#[derive(Debug, Clone, Default)]
pub struct StaticElevatedGroup {
    members: BTreeSet<u64>,
}

impl StaticElevatedGroup {
    pub fn new(members: impl IntoIterator<Item = u64>) -> Self {
        Self {
            members: members.into_iter().collect(),
        }
    }
}

impl ElevatedGroupSource for StaticElevatedGroup {
    fn members(&self) -> Result<BTreeSet<u64>, StaffError> {
        Ok(self.members.clone())
    }
}
