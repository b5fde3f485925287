//! # Memory Layout and Boot Handoff
//!
//! Constants and handoff types shared by the memory allocators of a
//! capability-based userland runtime. This crate is the single source of
//! truth for page granularity, the 32-bit ARM address-space layout and the
//! tuning knobs of the allocators' own metadata pools.
//!
//! ## Architecture
//!
//! ### Boot Information ([`boot`])
//! What the init domain learns about physical memory when it starts:
//! * **Memory regions**: base, size and type of every region the kernel
//!   reports, in the order the kernel created the matching capabilities
//! * **Core identity**: which core the domain runs on, used to split free
//!   RAM between cores
//!
//! ### Memory Layout ([`memory`])
//! * **Page granularity**: base page size and table geometry
//! * **Capability sizes**: slot and `CNode` object sizes used when carving
//!   capability storage out of RAM
//! * **Metadata budgets**: low watermarks and bootstrap node counts
//!
//! ## Virtual Address Layout
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │   Kernel / reserved window      │
//! VADDR_OFFSET├─────────────────────────────────┤ 0x4000_0000
//!             │                                 │
//!             │   Domain-managed address space  │
//!             │   (paging allocator)            │
//!             │                                 │
//! VADDR_LIMIT └─────────────────────────────────┘ 0xFFFF_FFFF
//! ```
//!
//! Every 1 MiB of virtual address space is described by one first-level
//! entry; the matching second-level table is created on first use and holds
//! 256 entries of 4 KiB each.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
