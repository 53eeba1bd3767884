//! Lifecycle registry of submitted experiments
//!
//! Owned by a single [`ChaosClient`](super::ChaosClient); clones of the
//! client share it. Every access goes through one mutex and the lock is never
//! held across an `.await`.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::types::{ExperimentHandle, ExperimentState};

#[derive(Debug, Default)]
pub struct LifecycleRegistry {
    inner: Mutex<Entries>,
}

#[derive(Debug, Default)]
struct Entries {
    by_id: HashMap<String, Entry>,
    next_seq: u64,
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    handle: ExperimentHandle,
}

impl LifecycleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `handle`; replaces any entry with the same id
    pub fn register(&self, handle: ExperimentHandle) {
        let mut entries = self.inner.lock();
        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries
            .by_id
            .insert(handle.id.clone(), Entry { seq, handle });
    }

    pub fn get(&self, id: &str) -> Option<ExperimentHandle> {
        self.inner.lock().by_id.get(id).map(|e| e.handle.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().by_id.contains_key(id)
    }

    /// Returns false when `id` is not registered
    pub fn set_state(&self, id: &str, state: ExperimentState) -> bool {
        match self.inner.lock().by_id.get_mut(id) {
            Some(entry) => {
                entry.handle.state = state;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &str) -> Option<ExperimentHandle> {
        self.inner.lock().by_id.remove(id).map(|e| e.handle)
    }

    /// Handles in registration order
    pub fn handles(&self) -> Vec<ExperimentHandle> {
        let entries = self.inner.lock();
        let mut ordered: Vec<&Entry> = entries.by_id.values().collect();
        ordered.sort_by_key(|e| e.seq);
        ordered.into_iter().map(|e| e.handle.clone()).collect()
    }

    /// Ids in registration order
    pub fn ids(&self) -> Vec<String> {
        self.handles().into_iter().map(|h| h.id).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
