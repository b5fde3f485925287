//! # Physical and Virtual Address Types
//!
//! Strongly typed wrappers for the two address spaces the allocators manage.
//!
//! | Type | Width | Meaning |
//! |------|-------|---------|
//! | [`PhysicalAddress`] | 64 bit | A location in RAM or device memory, named by a capability. |
//! | [`VirtualAddress`] | 32 bit | A location in a domain's ARMv7 address space. |
//! | [`ArmVirtualAddress`] | 32 bit | A virtual address split into table indices and page offset. |
//!
//! ## Page Sizes
//!
//! - [`Size4K`]: small pages, the granularity of every allocation
//! - [`Size1M`]: the span of one first-level table entry
//!
//! ```rust
//! # use aos_addresses::*;
//! let va = VirtualAddress::new(0x4010_3042);
//! let split = va.split();
//! assert_eq!(split.l1_index(), 0x401);
//! assert_eq!(split.l2_index(), 0x03);
//! assert_eq!(split.page_offset(), 0x042);
//! assert_eq!(va.align_down::<Size4K>(), VirtualAddress::new(0x4010_3000));
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

mod arm_va;
mod page_size;
mod physical_address;
mod virtual_address;

pub use arm_va::ArmVirtualAddress;
pub use page_size::{PageSize, Size1M, Size4K};
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;

/// Align `x` down to the next multiple of `a`.
///
/// `a` must be a non-zero power of two.
///
/// ### Examples
/// ```rust
/// # use aos_addresses::align_down;
/// assert_eq!(align_down(0x1fff, 0x1000), 0x1000);
/// assert_eq!(align_down(0x2000, 0x1000), 0x2000);
/// ```
#[inline]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    x & !(a - 1)
}

/// Align `x` up to the next multiple of `a`.
///
/// `a` must be a non-zero power of two and `x + a - 1` must not overflow.
///
/// ### Examples
/// ```rust
/// # use aos_addresses::align_up;
/// assert_eq!(align_up(0, 4096), 0);
/// assert_eq!(align_up(1, 4096), 4096);
/// assert_eq!(align_up(4096, 4096), 4096);
/// assert_eq!(align_up(4097, 4096), 8192);
/// ```
#[inline]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> u64 {
    (x + a - 1) & !(a - 1)
}

/// Round `bytes` up to whole base pages, or `None` on overflow.
///
/// ```rust
/// # use aos_addresses::page_round_up;
/// assert_eq!(page_round_up(1), Some(4096));
/// assert_eq!(page_round_up(u64::MAX), None);
/// ```
#[inline]
#[must_use]
pub const fn page_round_up(bytes: u64) -> Option<u64> {
    bytes.checked_next_multiple_of(Size4K::SIZE)
}
