use crate::{CNodeSource, SlotAllocator, SlotError};
use aos_caps::{CNodeRef, CapRef};
use aos_info::memory::SLOT_LOW_WATERMARK;
use aos_slab::RefillState;
use core::mem;

/// Scratch slots a refill takes from the buffer it does not refill.
const REFILL_SCRATCH: u32 = 2;

#[derive(Debug, Copy, Clone, Default)]
struct SlotBuffer {
    cnode: Option<CNodeRef>,
    next: u32,
    free: u32,
}

impl SlotBuffer {
    const fn take(&mut self, count: u32) -> Option<CapRef> {
        let Some(cnode) = self.cnode else {
            return None;
        };
        if self.free < count {
            return None;
        }
        let first = CapRef::new(cnode, self.next);
        self.next += count;
        self.free -= count;
        Some(first)
    }

    /// Takes back `cap` if it is the most recently handed out slot.
    fn give_back(&mut self, cap: CapRef) -> bool {
        if self.cnode == Some(cap.cnode) && cap.slot + 1 == self.next {
            self.next -= 1;
            self.free += 1;
            true
        } else {
            false
        }
    }
}

/// Two-buffer slot pre-allocator.
///
/// Slots are handed out in order from the active `CNode`. When it cannot
/// satisfy a request, the allocator switches to the other buffer; whatever
/// was left in the old one is abandoned. Only the most recently allocated
/// slot of a buffer is reclaimed by [`free`](SlotAllocator::free); other
/// slots are leaked.
#[derive(Debug)]
pub struct SlotPrealloc {
    buffers: [SlotBuffer; 2],
    current: usize,
    slots_per_cnode: u32,
    state: RefillState,
    deferred: bool,
}

impl SlotPrealloc {
    /// Starts with `initial`, an empty `CNode` of `slots_per_cnode` slots, as
    /// the active buffer.
    #[must_use]
    pub const fn new(initial: CNodeRef, slots_per_cnode: u32) -> Self {
        Self {
            buffers: [
                SlotBuffer {
                    cnode: Some(initial),
                    next: 0,
                    free: slots_per_cnode,
                },
                SlotBuffer {
                    cnode: None,
                    next: 0,
                    free: 0,
                },
            ],
            current: 0,
            slots_per_cnode,
            state: RefillState::Idle,
            deferred: false,
        }
    }

    /// Free slots in the active buffer.
    #[must_use]
    pub const fn active_free(&self) -> u32 {
        self.buffers[self.current].free
    }

    /// Free slots in the inactive buffer.
    #[must_use]
    pub const fn inactive_free(&self) -> u32 {
        self.buffers[1 - self.current].free
    }

    #[must_use]
    pub const fn refill_state(&self) -> RefillState {
        self.state
    }

    /// Refills the emptier buffer with scratch slots from the other one.
    fn refill_once(&mut self, source: &mut dyn CNodeSource) -> Result<bool, SlotError> {
        let (target, donor) = if self.buffers[0].free <= self.buffers[1].free {
            (0, 1)
        } else {
            (1, 0)
        };
        if self.buffers[target].free >= SLOT_LOW_WATERMARK {
            return Ok(false);
        }

        let Some(ram_slot) = self.buffers[donor].take(1) else {
            return Err(SlotError::OutOfSlots {
                requested: REFILL_SCRATCH,
            });
        };
        let Some(cnode_slot) = self.buffers[donor].take(1) else {
            self.buffers[donor].give_back(ram_slot);
            return Err(SlotError::OutOfSlots {
                requested: REFILL_SCRATCH,
            });
        };

        match source.create_cnode(ram_slot, cnode_slot) {
            Ok(cnode) => {
                self.buffers[target] = SlotBuffer {
                    cnode: Some(cnode),
                    next: 0,
                    free: self.slots_per_cnode,
                };
                // Keep draining the donor; the fresh buffer is the reserve.
                self.current = donor;
                log::debug!(
                    "slot buffer {target} refilled with {cnode:?} ({} slots)",
                    self.slots_per_cnode
                );
                Ok(true)
            }
            Err(e) => {
                self.buffers[donor].give_back(cnode_slot);
                self.buffers[donor].give_back(ram_slot);
                Err(e)
            }
        }
    }
}

impl SlotAllocator for SlotPrealloc {
    fn alloc_range(&mut self, count: u32) -> Result<CapRef, SlotError> {
        if count == 0 {
            return Err(SlotError::InvalidCount);
        }
        if let Some(cap) = self.buffers[self.current].take(count) {
            return Ok(cap);
        }
        let other = 1 - self.current;
        if let Some(cap) = self.buffers[other].take(count) {
            log::trace!(
                "switching slot buffer, abandoning {} slots",
                self.buffers[self.current].free
            );
            self.buffers[self.current].free = 0;
            self.current = other;
            return Ok(cap);
        }
        Err(SlotError::OutOfSlots { requested: count })
    }

    fn free(&mut self, cap: CapRef) -> Result<(), SlotError> {
        if !self.buffers.iter_mut().any(|b| b.give_back(cap)) {
            log::trace!("slot {cap} not reclaimed");
        }
        Ok(())
    }

    fn space(&self) -> u32 {
        self.buffers[0].free + self.buffers[1].free
    }

    fn needs_refill(&self) -> bool {
        self.buffers.iter().all(|b| b.free < SLOT_LOW_WATERMARK)
    }

    /// A refill requested while one is running fails with
    /// [`SlotError::ReentrantRefill`] and makes the running refill do one
    /// more pass before it returns.
    fn refill(&mut self, source: &mut dyn CNodeSource) -> Result<bool, SlotError> {
        if self.state == RefillState::Refilling {
            self.deferred = true;
            return Err(SlotError::ReentrantRefill);
        }
        let mut refilled = false;
        loop {
            self.state = RefillState::Refilling;
            let result = self.refill_once(source);
            self.state = RefillState::Idle;
            let again = mem::take(&mut self.deferred);
            match result {
                Ok(done) => refilled |= done,
                Err(e) if !refilled => return Err(e),
                Err(e) => {
                    log::warn!("deferred slot refill failed: {e}");
                    return Ok(true);
                }
            }
            if !again {
                return Ok(refilled);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingSource {
        next: u32,
        calls: Vec<(CapRef, CapRef)>,
    }

    impl CNodeSource for CountingSource {
        fn create_cnode(&mut self, ram: CapRef, cnode: CapRef) -> Result<CNodeRef, SlotError> {
            self.calls.push((ram, cnode));
            self.next += 1;
            Ok(CNodeRef::new(100 + self.next))
        }
    }

    #[test]
    fn hands_out_consecutive_slots() {
        let mut sa = SlotPrealloc::new(CNodeRef::new(1), 16);
        let a = sa.alloc().unwrap();
        let b = sa.alloc_range(3).unwrap();
        let c = sa.alloc().unwrap();
        assert_eq!(a.slot, 0);
        assert_eq!(b.slot, 1);
        assert_eq!(c.slot, 4);
        assert_eq!(sa.space(), 11);
    }

    #[test]
    fn only_the_last_slot_rolls_back() {
        let mut sa = SlotPrealloc::new(CNodeRef::new(1), 16);
        let a = sa.alloc().unwrap();
        let b = sa.alloc().unwrap();
        sa.free(a).unwrap();
        assert_eq!(sa.space(), 14);
        sa.free(b).unwrap();
        assert_eq!(sa.space(), 15);
        assert_eq!(sa.alloc().unwrap(), b);
    }

    #[test]
    fn refill_draws_scratch_from_the_other_buffer() {
        let mut sa = SlotPrealloc::new(CNodeRef::new(1), 8);
        sa.alloc_range(4).unwrap();
        assert!(sa.needs_refill());

        let mut src = CountingSource {
            next: 0,
            calls: Vec::new(),
        };
        assert!(sa.refill(&mut src).unwrap());
        assert_eq!(src.calls.len(), 1);
        let (ram, cnode) = src.calls[0];
        assert_eq!(ram.cnode, CNodeRef::new(1));
        assert_eq!((ram.slot, cnode.slot), (4, 5));
        assert_eq!(sa.active_free(), 2);
        assert_eq!(sa.inactive_free(), 8);
        assert!(!sa.needs_refill());

        // Exhausting the active buffer switches to the fresh CNode.
        sa.alloc_range(2).unwrap();
        let next = sa.alloc().unwrap();
        assert_eq!(next.cnode, CNodeRef::new(101));
        assert_eq!(next.slot, 0);
    }

    #[test]
    fn refill_without_scratch_fails() {
        let mut sa = SlotPrealloc::new(CNodeRef::new(1), 4);
        sa.alloc_range(3).unwrap();
        let mut src = CountingSource {
            next: 0,
            calls: Vec::new(),
        };
        assert_eq!(
            sa.refill(&mut src),
            Err(SlotError::OutOfSlots { requested: 2 })
        );
        assert!(src.calls.is_empty());
        assert_eq!(sa.space(), 1);
    }

    #[test]
    fn nested_refill_runs_after_the_current_one() {
        let mut sa = SlotPrealloc::new(CNodeRef::new(1), 8);
        sa.alloc_range(4).unwrap();
        let mut src = CountingSource {
            next: 0,
            calls: Vec::new(),
        };

        sa.state = RefillState::Refilling;
        assert_eq!(sa.refill(&mut src), Err(SlotError::ReentrantRefill));
        assert!(src.calls.is_empty());
        sa.state = RefillState::Idle;

        // The outer refill fills the empty buffer, then the deferred pass
        // tops up the donor that fell below the watermark.
        assert!(sa.refill(&mut src).unwrap());
        assert_eq!(src.calls.len(), 2);
        assert_eq!(sa.space(), 14);
        assert_eq!(sa.refill_state(), RefillState::Idle);

        // Nothing is left deferred.
        assert!(!sa.refill(&mut src).unwrap());
        assert_eq!(src.calls.len(), 2);
    }

    #[test]
    fn unknown_slots_are_leaked() {
        let mut sa = SlotPrealloc::new(CNodeRef::new(1), 4);
        sa.alloc().unwrap();
        sa.free(CapRef::new(CNodeRef::new(9), 0)).unwrap();
        assert_eq!(sa.space(), 3);
    }
}
