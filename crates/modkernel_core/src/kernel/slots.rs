//! Indexed list with O(1) swap-remove.

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Ordered entries plus a key→slot index kept in sync on every removal.
///
/// Removing an entry moves the last entry into the freed slot and updates
/// that entry's recorded index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotList<K: Ord + Copy> {
    entries: Vec<K>,
    slots: BTreeMap<K, usize>,
}

impl<K: Ord + Copy> Default for SlotList<K> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            slots: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Copy> SlotList<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `key` and returns its slot. A key already present keeps its
    /// slot.
    pub fn push(&mut self, key: K) -> usize {
        if let Some(slot) = self.slots.get(&key) {
            return *slot;
        }
        let slot = self.entries.len();
        self.entries.push(key);
        self.slots.insert(key, slot);
        slot
    }

    /// Removes `key`, returning the slot it occupied.
    pub fn swap_remove(&mut self, key: &K) -> Option<usize> {
        let slot = self.slots.remove(key)?;
        self.entries.swap_remove(slot);
        if let Some(moved) = self.entries.get(slot).copied() {
            self.slots.insert(moved, slot);
        }
        Some(slot)
    }

    pub fn index_of(&self, key: &K) -> Option<usize> {
        self.slots.get(key).copied()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn as_slice(&self) -> &[K] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &K> {
        self.entries.iter()
    }
}

impl<K: Ord + Copy + Serialize> Serialize for SlotList<K> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.entries)
    }
}
