//! Upstream registry storage
//!
//! The keyed store of upstream entries plus the ordered secondary index
//! used for deterministic full-table scans, and the parent/child index
//! linking (S,G) entries to their covering wildcard entries.
//!
//! This layer is purely structural: reference counting, lookup, and tree
//! links. The state machines driving the entries live in [`crate::engine`],
//! which owns a registry and performs the collaborator side effects that
//! creation and teardown require.

use std::collections::{BTreeSet, HashMap};

use super::entry::UpstreamEntry;
use super::key::UpstreamKey;

/// Keyed store of upstream entries
///
/// Parent/child relations are stored as keys resolved through the store,
/// never as owning references; the store is the sole owner of every entry.
#[derive(Debug, Default)]
pub struct UpstreamRegistry {
    /// Entries by key
    entries: HashMap<UpstreamKey, UpstreamEntry>,

    /// Secondary index ordered by (group, source)
    ordered: BTreeSet<UpstreamKey>,
}

impl UpstreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entry by key
    pub fn find(&self, key: &UpstreamKey) -> Option<&UpstreamEntry> {
        self.entries.get(key)
    }

    /// Look up an entry by key, mutably
    pub fn find_mut(&mut self, key: &UpstreamKey) -> Option<&mut UpstreamEntry> {
        self.entries.get_mut(key)
    }

    /// Whether any entry exists for the key
    pub fn contains(&self, key: &UpstreamKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of every key in canonical (group, source) order
    ///
    /// Scans that may delete entries walk this snapshot rather than a
    /// live iterator.
    pub fn keys_ordered(&self) -> Vec<UpstreamKey> {
        self.ordered.iter().copied().collect()
    }

    /// Insert a new entry and wire up the parent/child index
    ///
    /// The key must not already be present. For an (S,G) entry the
    /// covering (*,G) becomes its parent if it exists. A new (*,G) adopts
    /// every same-group (S,G) entry as a child and links under (*,*) if
    /// present; a new (*,*) adopts every (*,G) entry.
    pub fn insert(&mut self, mut entry: UpstreamEntry) {
        let key = entry.key;
        debug_assert!(!self.entries.contains_key(&key), "duplicate upstream key {}", key);

        if key.is_source_group() {
            if let Some(cover) = key.covering_key() {
                if let Some(parent) = self.entries.get_mut(&cover) {
                    parent.children.insert(key);
                    entry.parent = Some(cover);
                }
            }
        } else {
            for child_key in self.adoptable_children(&key) {
                if let Some(child) = self.entries.get_mut(&child_key) {
                    child.parent = Some(key);
                    entry.children.insert(child_key);
                }
            }
            if let Some(cover) = key.covering_key() {
                if let Some(parent) = self.entries.get_mut(&cover) {
                    parent.children.insert(key);
                    entry.parent = Some(cover);
                }
            }
        }

        self.ordered.insert(key);
        self.entries.insert(key, entry);
    }

    /// Remove an entry, unlinking it from the tree
    ///
    /// Children survive with their parent link cleared; the entry is
    /// removed from its own parent's child set. Timers and collaborator
    /// references must already be released by the caller.
    pub fn remove(&mut self, key: &UpstreamKey) -> Option<UpstreamEntry> {
        let entry = self.entries.remove(key)?;
        self.ordered.remove(key);

        for child_key in &entry.children {
            if let Some(child) = self.entries.get_mut(child_key) {
                child.parent = None;
            }
        }
        if let Some(parent_key) = entry.parent {
            if let Some(parent) = self.entries.get_mut(&parent_key) {
                parent.children.remove(key);
            }
        }

        Some(entry)
    }

    /// Drop every entry at once, for daemon shutdown
    pub fn clear(&mut self) {
        self.entries.clear();
        self.ordered.clear();
    }

    /// Keys a newly inserted wildcard entry should parent
    ///
    /// A (*,G) covers the (S,G) entries of its group; (*,*) covers the
    /// (*,G) entries. Keeping each shape one level down preserves the
    /// invariant that an (S,G) parent is always the same-group (*,G).
    fn adoptable_children(&self, key: &UpstreamKey) -> Vec<UpstreamKey> {
        self.ordered
            .iter()
            .filter(|cand| {
                if *cand == key {
                    return false;
                }
                if key.is_star_star() {
                    cand.is_wildcard() && !cand.is_star_star()
                } else {
                    cand.is_source_group() && cand.group == key.group
                }
            })
            .copied()
            .collect()
    }
}
