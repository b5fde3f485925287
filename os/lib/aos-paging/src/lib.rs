//! # Virtual Address-Space Allocator
//!
//! Bookkeeping for one domain's 32-bit ARM address space: which ranges are
//! free, which are reserved for lazily backed regions, and which are mapped,
//! plus the second-level page tables that hold the mappings.
//!
//! ```text
//!  start                                                       0xFFFF_FFFF
//!    ├── Free ──┼── Mapped ──┼──── Reserved (region #0) ────┼── Free ──┤
//!                     │              │ faulted │
//!                     ▼              ▼         ▼
//!   L1[va >> 20] ──► L2[(va >> 12) & 0xFF] ──► page-sized Frame
//! ```
//!
//! ## Phases
//!
//! [`PagingState::alloc`] only *finds* a Free range; nothing is claimed
//! until [`PagingState::map_fixed_attr`] commits a frame to it. A commit
//! first splits the range off, then creates missing second-level tables and
//! installs one entry per page, each through its own page-sized frame
//! capability retyped from the caller's frame. Any failure unwinds the
//! mapping and returns the range to Free.
//!
//! ## Regions
//!
//! [`PagingState::region_init`] reserves a range without backing it.
//! [`PagingRegion::map`] hands out pieces of it, and
//! [`PagingState::handle_page_fault`] backs individual pages on first
//! touch with memory from a [`RamAlloc`](aos_caps::RamAlloc).
//!
//! ## Metadata
//!
//! Range nodes live in a [`SlabPool`](aos_slab::SlabPool) topped up before
//! every operation that may split. Slots come from a
//! [`SlotAllocator`](aos_slot::SlotAllocator); refilling it needs a
//! [`CNodeSource`](aos_slot::CNodeSource), which the caller passes to
//! [`PagingState::refill_slots`].

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod error;
mod fault;
mod list;
mod node;
mod region;
mod state;
mod tables;

use aos_info::memory::BASE_PAGE_BITS;

pub use error::PagingError;
pub use node::{FrameAllocation, RegionId, VRegionInfo, VRegionState};
pub use region::PagingRegion;
pub use state::PagingState;

pub(crate) use state::page_round_up;

/// Page size in the 32-bit virtual address domain.
pub(crate) const PAGE: u32 = 1 << BASE_PAGE_BITS;
