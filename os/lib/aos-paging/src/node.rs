use aos_addresses::VirtualAddress;
use aos_caps::CapRef;
use aos_slab::SlabKey;
use alloc::vec::Vec;
use core::fmt;

/// Identifies a [`PagingRegion`](crate::PagingRegion) within one address space.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RegionId(pub(crate) u32);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region #{}", self.0)
    }
}

/// One installed page: the page-sized frame capability and the mapping
/// capability recording its entry.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct PageMapping {
    pub vaddr: VirtualAddress,
    pub frame: CapRef,
    pub mapping: CapRef,
}

/// A frame together with the RAM it was retyped from.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FrameAllocation {
    pub frame: CapRef,
    pub ram: CapRef,
    /// Size of both capabilities.
    pub bytes: u64,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) enum VKind {
    Free,
    /// Claimed by a paging region, backed on fault.
    Reserved { region: RegionId },
    Allocated {
        pages: Vec<PageMapping>,
        /// Set for pages a region backed on fault.
        backing: Option<Backing>,
    },
}

/// The frame a page fault allocated, owned by the mapping it backs.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct Backing {
    pub region: RegionId,
    pub frame: FrameAllocation,
}

impl VKind {
    /// Whether the kind describes unmapped address space, which may merge.
    pub const fn is_vacant(&self) -> bool {
        matches!(self, Self::Free | Self::Reserved { .. })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct VNode {
    pub base: VirtualAddress,
    pub size: u32,
    pub kind: VKind,
    pub prev: Option<SlabKey>,
    pub next: Option<SlabKey>,
}

impl VNode {
    pub const fn new(base: VirtualAddress, size: u32, kind: VKind) -> Self {
        Self {
            base,
            size,
            kind,
            prev: None,
            next: None,
        }
    }

    /// Exclusive end; may be `2^32` for the last node.
    pub fn end(&self) -> u64 {
        self.base.as_u64() + u64::from(self.size)
    }

    pub fn contains(&self, vaddr: VirtualAddress, bytes: u32) -> bool {
        self.base <= vaddr && vaddr.as_u64() + u64::from(bytes) <= self.end()
    }
}

/// What a virtual range is currently used for.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum VRegionState {
    Free,
    Reserved(RegionId),
    Mapped,
}

/// A snapshot of one range of the address space.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VRegionInfo {
    pub base: VirtualAddress,
    pub size: u32,
    pub state: VRegionState,
    /// Pages installed in the page tables.
    pub pages: usize,
}
