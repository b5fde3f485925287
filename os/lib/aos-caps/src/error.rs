use crate::{CapRef, ObjType};

/// Failure of a kernel capability operation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum CapError {
    #[error("slot {0} holds no capability")]
    NullCap(CapRef),
    #[error("slot {0} is already occupied")]
    SlotInUse(CapRef),
    #[error("slot {0} does not exist")]
    InvalidSlot(CapRef),
    #[error("cannot retype {from:?} into {to:?}")]
    InvalidRetype { from: ObjType, to: ObjType },
    #[error("invalid object size {0:#x}")]
    InvalidSize(u64),
    #[error("invalid retype offset {0:#x}")]
    InvalidOffset(u64),
    #[error("range {offset:#x}+{bytes:#x} exceeds the {available:#x} bytes of the source")]
    OutOfBounds {
        offset: u64,
        bytes: u64,
        available: u64,
    },
    #[error("retype overlaps an existing descendant")]
    RetypeOverlap,
    #[error("expected a {expected:?} capability, found {found:?}")]
    WrongType { expected: ObjType, found: ObjType },
    #[error("page-table entry {0} is already in use")]
    VnodeSlotInUse(u16),
    #[error("page-table entry range starting at {0} is out of bounds")]
    VnodeSlotRange(u16),
    #[error("mapping is not installed in this table")]
    NotMapped,
    #[error("kernel refused {0}")]
    Refused(&'static str),
}

/// Failure of a RAM allocation or release.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum RamAllocError {
    #[error("no free region of {bytes:#x} bytes")]
    OutOfMemory { bytes: u64 },
    #[error("allocator metadata exhausted")]
    OutOfMetadata,
    #[error("region does not match an allocation")]
    InvalidRegion,
    #[error("capability operation failed")]
    Capability(#[from] CapError),
    #[error("allocator refill re-entered")]
    ReentrancyViolation,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl RamAllocError {
    /// Whether the caller may retry after growing the allocator's metadata.
    #[inline]
    #[must_use]
    pub const fn is_out_of_metadata(&self) -> bool {
        matches!(self, Self::OutOfMetadata)
    }
}
