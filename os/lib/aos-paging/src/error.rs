use aos_addresses::VirtualAddress;
use aos_caps::{CapError, RamAllocError};
use aos_slab::SlabError;
use aos_slot::SlotError;

/// Errors of the virtual address-space allocator.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PagingError {
    /// The node pool is empty and could not be refilled.
    #[error("out of virtual region nodes")]
    OutOfNodes,
    #[error(transparent)]
    Slots(#[from] SlotError),
    /// No Free range is large enough.
    #[error("out of virtual memory")]
    OutOfVirtualMemory,
    /// The range to map is not inside a single Free range.
    #[error("cannot map {bytes:#x} bytes at {vaddr}")]
    RegionMapFailed { vaddr: VirtualAddress, bytes: u32 },
    /// No mapping or region matches the request.
    #[error("no matching region")]
    InvalidRegion,
    #[error("capability operation failed: {0}")]
    Capability(#[from] CapError),
    #[error("refill re-entered while in progress")]
    ReentrancyViolation,
    #[error("address {0} is not page aligned")]
    Unaligned(VirtualAddress),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// A paging region has handed out all of its range.
    #[error("paging region exhausted")]
    RegionExhausted,
    /// A fault outside of any reserved region.
    #[error("segmentation fault at {addr}")]
    Segfault { addr: VirtualAddress },
    #[error("RAM allocation failed: {0}")]
    RamAlloc(#[from] RamAllocError),
}

impl PagingError {
    /// Whether the error is a shortage of bookkeeping rather than of address
    /// space or memory.
    #[must_use]
    pub const fn is_out_of_metadata(&self) -> bool {
        match self {
            Self::OutOfNodes => true,
            Self::Slots(e) => e.is_out_of_metadata(),
            Self::RamAlloc(e) => e.is_out_of_metadata(),
            _ => false,
        }
    }
}

impl From<SlabError> for PagingError {
    fn from(value: SlabError) -> Self {
        match value {
            SlabError::Exhausted | SlabError::SourceExhausted => Self::OutOfNodes,
            SlabError::ReentrantRefill => Self::ReentrancyViolation,
        }
    }
}
