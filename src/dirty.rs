use crate::region::REGION_CHUNKS;
use bitvec::prelude::*;

/// Chunks of a region changed since last save.
///
/// Modified chunks were put or deleted and are always written. Suspected
/// chunks were handed out mutably and are written only if their content
/// fingerprint changed.
#[derive(Debug, Clone)]
pub(crate) struct DirtyTracker {
    modified: BitVec,
    suspected: BitVec,
    /// Set when any chunk is modified or suspected.
    changed: bool,
}

impl DirtyTracker {
    pub(crate) fn new() -> Self {
        DirtyTracker {
            modified: bitvec![0; REGION_CHUNKS],
            suspected: bitvec![0; REGION_CHUNKS],
            changed: false,
        }
    }

    pub(crate) fn is_changed(&self) -> bool {
        self.changed
    }

    pub(crate) fn mark_modified(&mut self, index: usize) {
        self.modified.set(index, true);
        self.changed = true;
    }

    pub(crate) fn mark_suspected(&mut self, index: usize) {
        self.suspected.set(index, true);
        self.changed = true;
    }

    pub(crate) fn is_modified(&self, index: usize) -> bool {
        self.modified[index]
    }

    pub(crate) fn is_suspected(&self, index: usize) -> bool {
        self.suspected[index]
    }

    /// Indexes of modified or suspected chunks in ascending order.
    pub(crate) fn pending(&self) -> Vec<usize> {
        (0..REGION_CHUNKS)
            .filter(|index| self.modified[*index] || self.suspected[*index])
            .collect()
    }

    pub(crate) fn clear(&mut self, index: usize) {
        self.modified.set(index, false);
        self.suspected.set(index, false);
    }

    /// Recomputes changed flag after chunks were cleared.
    pub(crate) fn refresh(&mut self) {
        self.changed = self.modified.any() || self.suspected.any();
    }
}
