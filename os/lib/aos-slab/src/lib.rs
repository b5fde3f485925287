//! # Slab Pool
//!
//! Fixed-size node storage for the allocators' own bookkeeping. Both the
//! physical and the virtual allocator keep their interval lists in a
//! [`SlabPool`] and link nodes by [`SlabKey`] rather than by pointer.
//!
//! ## Growth
//!
//! A pool never grows on its own. When it runs low, its owner calls
//! [`SlabPool::refill`] with a [`SlabRefill`] strategy that decides how many
//! bytes of backing the pool may take:
//!
//! * [`StaticRefill`]: a fixed bootstrap budget, used before any RAM
//!   allocator is available;
//! * [`DefaultRefill`]: one page per refill, for pools whose backing comes
//!   from the heap;
//! * [`FnRefill`]: any caller-supplied closure.
//!
//! ```text
//!  blocks: [ Occ(g0) | Vac(g1) ─┐ | Occ(g0) | Vac(g0) ─┐ | Vac(g0) ─┐ ]
//!                     ▲         │            ▲         │            │
//!  free_head ─────────┘         └────────────┘         └────────────┘ → None
//! ```
//!
//! Each block carries a generation that is bumped when the block is freed,
//! so a key to a freed block never aliases the block's next occupant.
//!
//! ## Refill Discipline
//!
//! A refill may be long-running and may itself allocate from other
//! allocators. The pool therefore tracks a [`RefillState`]: a second refill
//! requested while one is in progress fails with
//! [`SlabError::ReentrantRefill`] and is remembered, and the running refill
//! performs one more pass before it returns.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod error;
mod pool;
mod refill;

pub use error::SlabError;
pub use pool::{RefillState, SlabKey, SlabPool};
pub use refill::{DefaultRefill, FnRefill, SlabRefill, StaticRefill};
