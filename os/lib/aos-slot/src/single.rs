use crate::{SlotAllocator, SlotError};
use aos_caps::{CNodeRef, CapRef};
use alloc::vec;
use alloc::vec::Vec;

/// Allocates slots from a single, fixed `CNode`.
///
/// Free slots are kept as address-ordered runs; freed slots are coalesced
/// with their neighbours, so any slot can be returned at any time.
#[derive(Debug, Clone)]
pub struct SingleSlotAllocator {
    cnode: CNodeRef,
    slots: u32,
    /// Free runs as `(first, count)`, sorted, never adjacent.
    free: Vec<(u32, u32)>,
}

impl SingleSlotAllocator {
    #[must_use]
    pub fn new(cnode: CNodeRef, slots: u32) -> Self {
        Self {
            cnode,
            slots,
            free: if slots == 0 { Vec::new() } else { vec![(0, slots)] },
        }
    }

    #[must_use]
    pub const fn cnode(&self) -> CNodeRef {
        self.cnode
    }
}

impl SlotAllocator for SingleSlotAllocator {
    fn alloc_range(&mut self, count: u32) -> Result<CapRef, SlotError> {
        if count == 0 {
            return Err(SlotError::InvalidCount);
        }
        let Some(pos) = self.free.iter().position(|&(_, n)| n >= count) else {
            return Err(SlotError::OutOfSlots { requested: count });
        };
        let (first, n) = self.free[pos];
        if n == count {
            self.free.remove(pos);
        } else {
            self.free[pos] = (first + count, n - count);
        }
        Ok(CapRef::new(self.cnode, first))
    }

    fn free(&mut self, cap: CapRef) -> Result<(), SlotError> {
        if cap.cnode != self.cnode || cap.slot >= self.slots {
            return Err(SlotError::ForeignSlot(cap));
        }
        let slot = cap.slot;
        let pos = self.free.partition_point(|&(first, _)| first <= slot);
        if pos > 0 {
            let (first, n) = self.free[pos - 1];
            if slot < first + n {
                return Err(SlotError::ForeignSlot(cap));
            }
        }

        let joins_prev = pos > 0 && {
            let (first, n) = self.free[pos - 1];
            first + n == slot
        };
        let joins_next = pos < self.free.len() && self.free[pos].0 == slot + 1;
        match (joins_prev, joins_next) {
            (true, true) => {
                let (_, next_n) = self.free.remove(pos);
                self.free[pos - 1].1 += 1 + next_n;
            }
            (true, false) => self.free[pos - 1].1 += 1,
            (false, true) => self.free[pos] = (slot, self.free[pos].1 + 1),
            (false, false) => self.free.insert(pos, (slot, 1)),
        }
        Ok(())
    }

    fn space(&self) -> u32 {
        self.free.iter().map(|&(_, n)| n).sum()
    }
}
