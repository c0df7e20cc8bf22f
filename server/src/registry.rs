//! Concurrency-safe id → entry map shared between connection tasks.
//!
//! Used for connected clients, live players and live spores. Ids come from a
//! per-registry counter starting at 1, so 0 never names an entry and can be
//! used on the wire as "no sender".

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct Registry<T> {
    next_id: AtomicU64,
    entries: RwLock<HashMap<u64, T>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert under a freshly generated id and return it.
    pub fn add(&self, value: T) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.write().insert(id, value);
        id
    }

    /// Insert under an id chosen by the caller, e.g. a player keyed by its
    /// connection's id. Replaces any entry already stored there.
    pub fn add_with_id(&self, value: T, id: u64) -> Option<T> {
        self.next_id.fetch_max(id.saturating_add(1), Ordering::Relaxed);
        self.entries.write().insert(id, value)
    }

    /// Remove and return the entry. Of several concurrent removals of the
    /// same id exactly one gets `Some`.
    pub fn remove(&self, id: u64) -> Option<T> {
        self.entries.write().remove(&id)
    }

    /// Remove the entry only if it still matches, checked under the same
    /// write lock as the removal.
    pub fn remove_if(&self, id: u64, predicate: impl FnOnce(&T) -> bool) -> Option<T> {
        let mut entries = self.entries.write();
        if entries.get(&id).is_some_and(predicate) {
            entries.remove(&id)
        } else {
            None
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.read_recursive().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.read_recursive().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every entry under one read lock.
    ///
    /// The visitor may read this registry again (`get`, `len`, ...) but must
    /// not `add` or `remove` on it: that waits for the write lock held off by
    /// this very traversal. Use [`Registry::snapshot`] when entries have to be
    /// mutated while iterating.
    pub fn for_each(&self, mut visitor: impl FnMut(u64, &T)) {
        let entries = self.entries.read_recursive();
        for (id, value) in entries.iter() {
            visitor(*id, value);
        }
    }

    /// True if any entry matches. Stops at the first match.
    pub fn any(&self, mut predicate: impl FnMut(u64, &T) -> bool) -> bool {
        self.entries
            .read_recursive()
            .iter()
            .any(|(id, value)| predicate(*id, value))
    }
}

impl<T: Clone> Registry<T> {
    pub fn get(&self, id: u64) -> Option<T> {
        self.entries.read_recursive().get(&id).cloned()
    }

    /// Copy of all entries, taken under one read lock.
    pub fn snapshot(&self) -> Vec<(u64, T)> {
        self.entries
            .read_recursive()
            .iter()
            .map(|(id, value)| (*id, value.clone()))
            .collect()
    }
}
