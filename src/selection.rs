//! Operator selection of model ids for bulk actions

use crate::registry::RegistrySnapshot;
use std::collections::BTreeSet;

/// Ids picked by the operator, plus whether selection mode is active
///
/// Ids are never pruned when a model disappears from the fleet; readers use
/// [`SelectionSet::resolve`] to drop dangling ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    ids: BTreeSet<String>,
    active: bool,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn enter(&mut self) {
        self.active = true;
    }

    /// Leave selection mode, dropping any selection
    pub fn exit(&mut self) {
        self.active = false;
        self.ids.clear();
    }

    pub fn select(&mut self, id: impl Into<String>) {
        self.active = true;
        self.ids.insert(id.into());
    }

    pub fn deselect(&mut self, id: &str) {
        self.ids.remove(id);
    }

    /// Flip membership of `id`; returns whether it is now selected
    pub fn toggle(&mut self, id: &str) -> bool {
        if self.ids.remove(id) {
            false
        } else {
            self.select(id);
            true
        }
    }

    /// Select every id in `ids`, or clear them all if they are already selected
    pub fn toggle_all<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) {
        let ids: Vec<&str> = ids.into_iter().collect();
        if !ids.is_empty() && ids.iter().all(|id| self.ids.contains(*id)) {
            for id in ids {
                self.ids.remove(id);
            }
        } else {
            for id in ids {
                self.select(id);
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// All selected ids, including ones no longer in the fleet
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    /// Selected ids that still exist in `snapshot`
    pub fn resolve(&self, snapshot: &RegistrySnapshot) -> Vec<String> {
        self.ids
            .iter()
            .filter(|id| snapshot.contains(id))
            .cloned()
            .collect()
    }
}
