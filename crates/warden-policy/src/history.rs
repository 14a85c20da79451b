// history.rs - Fixed-capacity ring buffer of recent authorization denials.
//
// Once full, pushing a new record evicts the oldest one. Iteration runs
// oldest to newest; `recent()` returns newest first.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::DenyReason;

/// One refused command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenialRecord {
    pub actor_id: u64,
    /// Command identifier, e.g. `mod.blacklist`.
    pub command: String,
    pub reason: DenyReason,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DecisionHistory {
    entries: VecDeque<DenialRecord>,
    capacity: usize,
}

impl DecisionHistory {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a record, evicting the oldest when full. Returns the evicted
    /// record, if any.
    pub fn push(&mut self, record: DenialRecord) -> Option<DenialRecord> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(record);
        evicted
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &DenialRecord> {
        self.entries.iter()
    }

    /// Up to `n` records, newest first.
    pub fn recent(&self, n: usize) -> Vec<DenialRecord> {
        self.entries.iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for DecisionHistory {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denial(actor_id: u64) -> DenialRecord {
        DenialRecord {
            actor_id,
            command: "mod.blacklist".to_string(),
            reason: DenyReason::InsufficientPermission,
            at: Utc::now(),
        }
    }

    #[test]
    fn evicts_oldest_first() {
        let mut history = DecisionHistory::new(3);
        for actor in 1..=3 {
            assert!(history.push(denial(actor)).is_none());
        }
        let evicted = history.push(denial(4)).unwrap();
        assert_eq!(evicted.actor_id, 1);

        let actors: Vec<u64> = history.iter().map(|r| r.actor_id).collect();
        assert_eq!(actors, vec![2, 3, 4]);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn recent_is_newest_first_and_bounded() {
        let mut history = DecisionHistory::new(10);
        for actor in 1..=5 {
            history.push(denial(actor));
        }
        let recent: Vec<u64> = history.recent(2).iter().map(|r| r.actor_id).collect();
        assert_eq!(recent, vec![5, 4]);
        assert_eq!(history.recent(50).len(), 5);
    }

    #[test]
    fn zero_capacity_holds_one() {
        let mut history = DecisionHistory::new(0);
        history.push(denial(1));
        history.push(denial(2));
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.recent(5)[0].actor_id, 2);
        history.clear();
        assert!(history.is_empty());
    }
}
