//! Bounded conversation window.
//!
//! Entries are grouped into turn-groups: a `user` entry opens a new group and
//! the `assistant` and `tool` entries that follow belong to it. Eviction drops
//! whole groups from the front, so a tool result never outlives the turn that
//! produced it.

use crate::types::{Entry, Role};
use std::collections::VecDeque;
use tracing::trace;

pub const DEFAULT_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct HistoryStore {
    entries: VecDeque<Entry>,
    capacity: usize,
    next_sequence: u64,
    open_group: Option<u64>,
    groups: usize,
}

impl HistoryStore {
    /// `capacity` is the number of turn-groups retained; zero is raised to one
    /// so the current turn is always visible.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            next_sequence: 1,
            open_group: None,
            groups: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of turn-groups currently retained.
    pub fn turn_groups(&self) -> usize {
        self.groups
    }

    /// Appends `entry`, stamping its sequence number, and evicts the oldest
    /// turn-groups until at most `capacity` remain. Returns the sequence.
    pub fn append(&mut self, entry: Entry) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        // Assistant or tool entries with no open group start one of their own.
        let group = match (entry.role(), self.open_group) {
            (Role::User, _) | (_, None) => {
                self.groups += 1;
                self.open_group = Some(sequence);
                sequence
            }
            (_, Some(group)) => group,
        };

        self.entries.push_back(entry.stamp(sequence, group));

        while self.groups > self.capacity {
            self.evict_oldest_group();
        }
        sequence
    }

    /// Copy of the retained window in insertion order.
    pub fn snapshot(&self) -> Vec<Entry> {
        self.entries.iter().cloned().collect()
    }

    /// Empties the window. Sequence numbers keep increasing afterwards.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.open_group = None;
        self.groups = 0;
    }

    fn evict_oldest_group(&mut self) {
        let Some(oldest) = self.entries.front().map(Entry::group) else {
            self.groups = 0;
            return;
        };

        let mut evicted = 0;
        while self.entries.front().is_some_and(|e| e.group() == oldest) {
            self.entries.pop_front();
            evicted += 1;
        }
        self.groups -= 1;
        if self.open_group == Some(oldest) {
            self.open_group = None;
        }
        trace!(group = oldest, evicted, "evicted turn-group");
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
