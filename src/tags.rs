use crate::common::{PageTag, SlotId};

/// Bookkeeping for one associative way.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheSlot {
    pub tag: PageTag,
    pub valid: bool,
    pub dirty: bool,
}

/// Tag, valid and dirty state of every slot. A slot is only ever dirty while valid.
#[derive(Clone, Debug)]
pub struct TagStore {
    slots: Vec<CacheSlot>,
}

impl TagStore {
    pub fn new(num_slots: usize) -> Self {
        TagStore { slots: vec![CacheSlot::default(); num_slots] }
    }

    /// Slot holding `tag`, if any. At most one valid slot can match.
    pub fn lookup(&self, tag: PageTag) -> Option<SlotId> {
        self.slots.iter().position(|s| s.valid && s.tag == tag)
    }

    pub fn install(&mut self, slot: SlotId, tag: PageTag) {
        debug_assert!(self.lookup(tag).map_or(true, |s| s == slot), "page {tag:#x} resident twice");
        self.slots[slot] = CacheSlot { tag, valid: true, dirty: false };
    }

    pub fn mark_dirty(&mut self, slot: SlotId) {
        debug_assert!(self.slots[slot].valid);
        self.slots[slot].dirty = true;
    }

    pub fn clear_dirty(&mut self, slot: SlotId) {
        self.slots[slot].dirty = false;
    }

    /// Drop residency of a clean slot so it can be refilled.
    pub fn evict(&mut self, slot: SlotId) {
        debug_assert!(!self.slots[slot].dirty, "evicting dirty slot {slot}");
        self.slots[slot].valid = false;
        self.slots[slot].dirty = false;
    }

    pub fn invalidate_all(&mut self) {
        for s in self.slots.iter_mut() {
            s.valid = false;
            s.dirty = false;
        }
    }

    pub fn first_dirty(&self) -> Option<SlotId> {
        self.slots.iter().position(|s| s.dirty)
    }

    pub fn slot(&self, slot: SlotId) -> &CacheSlot {
        &self.slots[slot]
    }

    pub fn slots(&self) -> &[CacheSlot] {
        &self.slots
    }
}
