use std::fmt::{Display, Formatter};
use anyhow::bail;

/// Index of a slot handed out by an [Arena]. Ids are only meaningful for the arena that
///  created them, and only until that arena is reset.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct SlotId(usize);

impl SlotId {
    pub fn from_raw(value: usize) -> SlotId {
        SlotId(value)
    }
}

impl Display for SlotId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A bump allocator over a fixed number of slots.
///
/// Slots are handed out in order and never freed individually - the only way to reclaim them is
///  [Arena::reset], which invalidates every [SlotId] handed out before. Owners are expected to
///  size the arena for their known maximum up front, so running out of slots indicates a sizing
///  bug rather than a runtime condition.
pub struct Arena<T> {
    slots: Vec<T>,
    capacity: usize,
}

impl<T> Arena<T> {
    pub fn with_capacity(capacity: usize) -> Arena<T> {
        Arena {
            slots: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: T) -> anyhow::Result<SlotId> {
        if self.slots.len() == self.capacity {
            bail!("arena exhausted: all {} slots are in use", self.capacity);
        }

        self.slots.push(value);
        Ok(SlotId(self.slots.len() - 1))
    }

    pub fn get(&self, id: SlotId) -> &T {
        &self.slots[id.0]
    }

    pub fn get_mut(&mut self, id: SlotId) -> &mut T {
        &mut self.slots[id.0]
    }

    /// Reclaims all slots at once. The backing allocation is kept for reuse.
    pub fn reset(&mut self) {
        self.slots.clear();
    }

    pub fn used(&self) -> usize {
        self.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
