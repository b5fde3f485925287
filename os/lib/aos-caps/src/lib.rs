//! # Capability Interface
//!
//! The allocators in this workspace never touch memory directly. Physical
//! memory, page tables and capability storage are all named by opaque
//! capabilities, and the only things the allocators can do with them are the
//! kernel operations collected here.
//!
//! ```text
//!            ┌──────────────┐  retype(offset, size)   ┌──────────────┐
//!            │  RAM (Parent)│ ──────────────────────► │ RAM / Frame  │
//!            └──────────────┘                         └──────┬───────┘
//!                                                            │ vnode_map
//!   ┌────────────┐ vnode_map  ┌────────────┐                 ▼
//!   │ L1 VNode   │ ─────────► │ L2 VNode   │ ◄──────── page-table entry
//!   └────────────┘            └────────────┘
//! ```
//!
//! * [`CapOps`] covers retype, destroy, revoke and identify.
//! * [`VnodeOps`] adds page-table creation and mapping.
//! * [`RamAlloc`] is the contract between a RAM allocator and its clients,
//!   such as the paging code backing frames on demand.
//!
//! With the `sim` feature, [`sim::SimKernel`] provides a deterministic
//! in-memory kernel that enforces the same rules the real one does
//! (retype bounds, non-overlapping children, slot occupancy).

#![cfg_attr(not(any(test, doctest)), no_std)]

#[cfg(any(test, feature = "sim"))]
extern crate alloc;

mod cap;
mod error;
mod flags;
mod ops;
mod ram;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use cap::{CNodeRef, CapRef, FrameIdentity, ObjType};
pub use error::{CapError, RamAllocError};
pub use flags::VregionFlags;
pub use ops::{CapOps, MapRange, VnodeOps};
pub use ram::RamAlloc;
