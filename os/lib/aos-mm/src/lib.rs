//! # Physical Memory Allocator
//!
//! Hands out physical memory as capabilities. Memory enters the allocator as
//! donated capabilities (typically the RAM regions of the boot memory map)
//! and leaves it as freshly minted capabilities for aligned sub-ranges.
//!
//! ## Architecture
//!
//! ```text
//!  parent chain   ┌────────────────────────────┐   ┌──────────────┐
//!                 │ Parent A  0x1000..0x6000   │   │ Parent B ... │
//!                 └────────────────────────────┘   └──────────────┘
//!                   ▲          ▲          ▲
//!  region chain   ┌─┴──────┐ ┌─┴──────┐ ┌─┴──────────────┐
//!                 │ Free   │→│ Alloc  │→│ Free           │→ ...
//!                 │ 0x1000 │ │ 0x2000 │ │ 0x3000..0x6000 │
//!                 └────────┘ └────────┘ └────────────────┘
//! ```
//!
//! * Nodes live in a [`SlabPool`](aos_slab::SlabPool) and point at their
//!   Parent directly, so freeing never searches for provenance.
//! * Free ranges merge only with Free neighbours of the same Parent.
//!   Numerically adjacent donations stay separate so that each can still be
//!   revoked on its own.
//! * Allocation is first-fit. The two nodes a split may need and the slot
//!   for the new capability are secured before the list is touched, so an
//!   allocation either completes or leaves the list as it was.
//!
//! ## Bootstrapping
//!
//! The allocator needs slots for every capability it mints, and slots need
//! `CNode`s, which need RAM. A [`CNodeCarver`] closes that loop: it carves
//! `CNode` backing straight out of the allocator's list into slots supplied
//! by the refilling slot allocator, so refills never recurse into the
//! allocator's public entry points. [`initialize_ram_alloc`] wires all of
//! this up from the boot memory map.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod carver;
mod error;
mod list;
mod mm;
mod node;
mod ram;

pub use carver::CNodeCarver;
pub use error::MmError;
pub use mm::PhysicalMemoryAllocator;
pub use node::{Allocation, ParentInfo, RegionInfo, RegionState};
pub use ram::{RamSetup, RemainingMemory, initialize_ram_alloc};
