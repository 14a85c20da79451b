// locks.rs - Per-identity mutual exclusion.
//
// Mutations of the same entity (or the same staff profile) run one at a
// time; mutations of different identities never wait on each other. Lock
// entries are dropped again once no thread holds or waits on them.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

#[derive(Debug)]
pub struct KeyedLocks<K> {
    table: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` while holding the lock for `key`.
    pub fn with_lock<R>(&self, key: &K, f: impl FnOnce() -> R) -> R {
        let slot = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(table.entry(key.clone()).or_default())
        };

        let result = {
            let _guard = slot.lock().unwrap_or_else(|e| e.into_inner());
            f()
        };

        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        // Only the table and this thread still reference the slot.
        if Arc::strong_count(&slot) == 2 {
            table.remove(key);
        }
        result
    }

    /// Number of identities currently locked or waited on.
    pub fn active(&self) -> usize {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}
