use crate::common::SlotId;

/// Exact LRU over the slots, kept as a usage stack: index 0 is the most
/// recently used slot, the last entry is the next victim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplacementEngine {
    order: Vec<SlotId>,
}

impl ReplacementEngine {
    /// Fresh engine; empty slots are handed out in ascending order.
    pub fn new(num_slots: usize) -> Self {
        ReplacementEngine { order: (0..num_slots).rev().collect() }
    }

    /// Start from an explicit most-recent-first order. Returns `None` unless
    /// `order` is a permutation of `0..order.len()`.
    pub fn with_order(order: Vec<SlotId>) -> Option<Self> {
        let mut seen = vec![false; order.len()];
        for &s in &order {
            if s >= seen.len() || seen[s] {
                return None;
            }
            seen[s] = true;
        }
        Some(ReplacementEngine { order })
    }

    pub fn record_hit(&mut self, slot: SlotId) {
        if let Some(pos) = self.order.iter().position(|&s| s == slot) {
            self.order.remove(pos);
            self.order.insert(0, slot);
        }
    }

    pub fn victim(&self) -> SlotId {
        self.order[self.order.len() - 1]
    }

    /// Most-recent-first.
    pub fn order(&self) -> &[SlotId] {
        &self.order
    }
}
