//! Dirty-bit core shared by every bag flavour.
//!
//! Writes accumulate in `raw_dirty`. Once per replication frame the raw set
//! is frozen into `snapshot_dirty`, which every observer serialising that
//! frame then reads. Taking the snapshot again within the same frame does
//! nothing, so all observers of one frame see the same changes, and writes
//! made after the snapshot only show up in the next frame.

use attribute_types::BitSet;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Bag {
    id: Uuid,
    raw_dirty: BitSet,
    snapshot_dirty: BitSet,
    last_snapshot_frame: Option<u32>,
}

impl Bag {
    pub fn new(field_count: usize) -> Self {
        Self::with_id(Uuid::new_v4(), field_count)
    }

    pub fn with_id(id: Uuid, field_count: usize) -> Self {
        Self {
            id,
            raw_dirty: BitSet::new(field_count),
            snapshot_dirty: BitSet::new(field_count),
            last_snapshot_frame: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn field_count(&self) -> usize {
        self.raw_dirty.len()
    }

    pub fn raw_dirty(&self) -> &BitSet {
        &self.raw_dirty
    }

    pub fn snapshot_dirty(&self) -> &BitSet {
        &self.snapshot_dirty
    }

    pub fn last_snapshot_frame(&self) -> Option<u32> {
        self.last_snapshot_frame
    }

    pub fn is_dirty(&self) -> bool {
        !self.raw_dirty.is_empty()
    }

    pub fn mark_dirty(&mut self, index: usize) {
        self.raw_dirty.add(index);
    }

    pub fn mark_all_dirty(&mut self) {
        self.raw_dirty.mark_all();
        self.snapshot_dirty.mark_all();
    }

    pub fn clear_dirty(&mut self) {
        self.raw_dirty.clear();
        self.snapshot_dirty.clear();
    }

    /// Freeze the pending writes for `frame`.
    ///
    /// Returns `false` when a snapshot for `frame` was already taken.
    pub fn update_snapshot(&mut self, frame: u32) -> bool {
        if self.last_snapshot_frame == Some(frame) {
            return false;
        }
        self.snapshot_dirty.clone_from(&self.raw_dirty);
        self.raw_dirty.clear();
        self.last_snapshot_frame = Some(frame);
        debug!(bag = %self.id, frame, changed = self.snapshot_dirty.count(), "bag snapshot");
        true
    }

    /// Fold a received change set into both dirty sets so the receiver can
    /// relay it.
    pub fn merge_changes(&mut self, changes: &BitSet) {
        self.snapshot_dirty |= changes;
        self.raw_dirty |= changes;
    }

    /// Change the number of tracked fields, keeping the bits that still fit.
    pub fn resize(&mut self, field_count: usize) {
        self.raw_dirty.resize(field_count);
        self.snapshot_dirty.resize(field_count);
    }
}
