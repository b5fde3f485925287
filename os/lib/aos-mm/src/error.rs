use aos_addresses::PhysicalAddress;
use aos_caps::{CapError, RamAllocError};
use aos_slab::SlabError;
use aos_slot::SlotError;

/// Errors of the physical memory allocator.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MmError {
    /// The node pool is exhausted and could not be refilled.
    #[error("out of region nodes")]
    OutOfNodes,
    /// No capability slot was available for the new capability.
    #[error("slot allocation failed")]
    Slots(#[from] SlotError),
    #[error("no free region of {size:#x} bytes aligned to {alignment:#x}")]
    OutOfMemory { size: u64, alignment: u64 },
    /// The region is not an allocation of this allocator, or overlaps a
    /// region that was already added.
    #[error("invalid region {base}+{size:#x}")]
    InvalidRegion { base: PhysicalAddress, size: u64 },
    #[error("capability operation failed")]
    Capability(#[from] CapError),
    #[error("allocator refill re-entered")]
    ReentrancyViolation,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl MmError {
    /// Whether the caller may retry after growing the allocator's metadata.
    #[must_use]
    pub const fn is_out_of_metadata(&self) -> bool {
        match self {
            Self::OutOfNodes => true,
            Self::Slots(e) => e.is_out_of_metadata(),
            _ => false,
        }
    }
}

impl From<SlabError> for MmError {
    fn from(value: SlabError) -> Self {
        match value {
            SlabError::Exhausted | SlabError::SourceExhausted => Self::OutOfNodes,
            SlabError::ReentrantRefill => Self::ReentrancyViolation,
        }
    }
}

impl From<MmError> for RamAllocError {
    fn from(value: MmError) -> Self {
        match value {
            MmError::OutOfNodes | MmError::Slots(SlotError::OutOfSlots { .. }) => Self::OutOfMetadata,
            MmError::Slots(SlotError::ReentrantRefill) | MmError::ReentrancyViolation => {
                Self::ReentrancyViolation
            }
            MmError::Slots(SlotError::Capability(e)) | MmError::Capability(e) => {
                Self::Capability(e)
            }
            MmError::Slots(SlotError::Ram(e)) => e,
            MmError::Slots(SlotError::InvalidCount | SlotError::ForeignSlot(_)) => {
                Self::InvalidArgument("slot allocator rejected the request")
            }
            MmError::OutOfMemory { size, .. } => Self::OutOfMemory { bytes: size },
            MmError::InvalidRegion { .. } => Self::InvalidRegion,
            MmError::InvalidArgument(what) => Self::InvalidArgument(what),
        }
    }
}
