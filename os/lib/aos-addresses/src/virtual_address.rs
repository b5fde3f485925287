use crate::{ArmVirtualAddress, PageSize};
use core::fmt;
use core::ops::{Add, AddAssign};

/// Virtual memory address in a 32-bit ARM address space.
///
/// ### Examples
/// ```rust
/// # use aos_addresses::*;
/// let va = VirtualAddress::new(0x4000_0000);
/// assert!(va.is_aligned::<Size1M>());
/// assert_eq!(va.checked_add(0xC000_0000), None);
/// assert_eq!(va.checked_add(0x1000), Some(VirtualAddress::new(0x4000_1000)));
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u32);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0 as u64
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned<S: PageSize>(self) -> bool {
        self.as_u64() & (S::SIZE - 1) == 0
    }

    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn align_down<S: PageSize>(self) -> Self {
        Self(self.0 & !((S::SIZE - 1) as u32))
    }

    /// Adds `rhs` bytes, returning `None` if the result leaves the 32-bit space.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u32) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Byte distance from `origin` to `self`; `origin` must not lie above `self`.
    #[inline]
    #[must_use]
    pub const fn offset_from(self, origin: Self) -> u32 {
        self.0 - origin.0
    }

    /// Splits the address into first-level index, second-level index and
    /// page offset.
    #[inline]
    #[must_use]
    pub const fn split(self) -> ArmVirtualAddress {
        ArmVirtualAddress::from_bits(self.0)
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:08X})", self.as_u32())
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.as_u32())
    }
}

impl From<u32> for VirtualAddress {
    #[inline]
    fn from(v: u32) -> Self {
        Self::new(v)
    }
}

impl From<ArmVirtualAddress> for VirtualAddress {
    #[inline]
    fn from(v: ArmVirtualAddress) -> Self {
        Self::new(v.into_bits())
    }
}

impl Add<u32> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u32> for VirtualAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u32) {
        self.0 += rhs;
    }
}
