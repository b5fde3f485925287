//! # Capability Slot Allocation
//!
//! Every capability the allocators mint needs an empty slot to land in.
//! Slots live in `CNode`s, and a new `CNode` is itself made from RAM, which
//! in turn needs slots. [`SlotPrealloc`] breaks that cycle with two buffers:
//!
//! ```text
//!   ┌────────── active ──────────┐   ┌───────── inactive ─────────┐
//!   │ used used used free free … │   │ (empty, waiting for refill)│
//!   └────────────────────────────┘   └────────────────────────────┘
//!             │  two scratch slots               ▲
//!             └──── RAM cap + CNode cap ─────────┘ fresh CNode
//! ```
//!
//! The refill of one buffer draws its two scratch slots from the other, so
//! it never needs a slot from the buffer it is refilling.
//!
//! Where the backing comes from is the business of a [`CNodeSource`],
//! typically the physical memory allocator carving RAM from its own list.
//! [`SingleSlotAllocator`] manages one fixed `CNode` and never refills.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod error;
mod prealloc;
mod single;

pub use error::SlotError;
pub use prealloc::SlotPrealloc;
pub use single::SingleSlotAllocator;

use aos_caps::{CNodeRef, CapRef};

/// Creates `CNode`s for a refilling slot allocator.
pub trait CNodeSource {
    /// Obtains RAM for a second-level `CNode` into `ram_slot`, retypes it into
    /// a `CNode` capability in `cnode_slot`, and returns the new table.
    ///
    /// On error, both slots are left empty.
    ///
    /// # Errors
    /// Whatever prevented obtaining RAM or creating the `CNode`.
    fn create_cnode(&mut self, ram_slot: CapRef, cnode_slot: CapRef) -> Result<CNodeRef, SlotError>;
}

/// An allocator of empty capability slots.
pub trait SlotAllocator {
    /// Allocates `count` consecutive slots in one `CNode` and returns the first.
    ///
    /// # Errors
    /// [`SlotError::OutOfSlots`] if no `CNode` has `count` free slots left.
    fn alloc_range(&mut self, count: u32) -> Result<CapRef, SlotError>;

    /// Allocates a single slot.
    ///
    /// # Errors
    /// [`SlotError::OutOfSlots`] if no slot is left.
    fn alloc(&mut self) -> Result<CapRef, SlotError> {
        self.alloc_range(1)
    }

    /// Returns a slot. The slot must be empty.
    ///
    /// # Errors
    /// Implementation specific; see the implementors.
    fn free(&mut self, cap: CapRef) -> Result<(), SlotError>;

    /// Number of slots that can still be allocated without a refill.
    fn space(&self) -> u32;

    /// Whether the allocator wants [`refill`](Self::refill) to be called
    /// before it runs dry.
    fn needs_refill(&self) -> bool {
        false
    }

    /// Replenishes the allocator from `source`. Returns `true` if new slots
    /// were added.
    ///
    /// # Errors
    /// [`SlotError::ReentrantRefill`] when called while a refill runs, or
    /// whatever `source` reports.
    fn refill(&mut self, source: &mut dyn CNodeSource) -> Result<bool, SlotError> {
        let _ = source;
        Ok(false)
    }
}

impl<S: SlotAllocator + ?Sized> SlotAllocator for &mut S {
    fn alloc_range(&mut self, count: u32) -> Result<CapRef, SlotError> {
        (**self).alloc_range(count)
    }

    fn alloc(&mut self) -> Result<CapRef, SlotError> {
        (**self).alloc()
    }

    fn free(&mut self, cap: CapRef) -> Result<(), SlotError> {
        (**self).free(cap)
    }

    fn space(&self) -> u32 {
        (**self).space()
    }

    fn needs_refill(&self) -> bool {
        (**self).needs_refill()
    }

    fn refill(&mut self, source: &mut dyn CNodeSource) -> Result<bool, SlotError> {
        (**self).refill(source)
    }
}
