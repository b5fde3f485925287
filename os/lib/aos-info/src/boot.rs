//! # Boot Information
//!
//! The memory map the kernel hands to the init domain. Region order matters:
//! the kernel creates one RAM capability per [`RegionType::Empty`] region, in
//! the order the regions appear, starting at slot 0 of the memory `CNode`.

use core::fmt;

/// Kind of a physical memory region reported at boot.
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegionType {
    /// Free RAM; a RAM capability exists for it.
    Empty = 0,
    /// Memory occupied by the init domain itself.
    RootTask = 1,
    /// Device memory, never handed to the RAM allocator.
    PhyAddr = 2,
    /// Platform tables and firmware data.
    PlatformData = 3,
    /// A boot module image.
    Module = 4,
    /// ACPI tables.
    Acpi = 5,
}

/// A physical memory region.
#[repr(C)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemRegion {
    /// Physical base address.
    pub base: u64,
    /// Size of the region in bytes.
    pub bytes: u64,
    /// What the region is used for.
    pub region_type: RegionType,
}

impl MemRegion {
    #[inline]
    #[must_use]
    pub const fn new(base: u64, bytes: u64, region_type: RegionType) -> Self {
        Self {
            base,
            bytes,
            region_type,
        }
    }

    /// Whether this region is free RAM backed by a capability.
    #[inline]
    #[must_use]
    pub const fn is_empty_ram(&self) -> bool {
        matches!(self.region_type, RegionType::Empty)
    }
}

/// Boot information passed to the init domain.
#[derive(Debug, Copy, Clone)]
pub struct BootInfo<'a> {
    /// All memory regions, in capability creation order.
    pub regions: &'a [MemRegion],
}

impl<'a> BootInfo<'a> {
    #[inline]
    #[must_use]
    pub const fn new(regions: &'a [MemRegion]) -> Self {
        Self { regions }
    }

    /// Iterates the free RAM regions together with their capability index.
    pub fn empty_regions(&self) -> impl Iterator<Item = (u32, &'a MemRegion)> + 'a {
        self.regions
            .iter()
            .filter(|r| r.is_empty_ram())
            .zip(0u32..)
            .map(|(r, i)| (i, r))
    }
}

/// Identifier of the core a domain runs on.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CoreId(pub u8);

impl CoreId {
    /// The bootstrap processor.
    pub const BSP: Self = Self(0);
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core {}", self.0)
    }
}
