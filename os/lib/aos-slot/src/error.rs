use aos_caps::{CapError, CapRef, RamAllocError};

/// Slot allocation failures.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SlotError {
    #[error("no {requested} consecutive free slots left")]
    OutOfSlots { requested: u32 },
    #[error("slot count must be non-zero")]
    InvalidCount,
    #[error("slot {0} was not handed out by this allocator")]
    ForeignSlot(CapRef),
    #[error("slot refill requested while a refill is in progress")]
    ReentrantRefill,
    #[error("capability operation failed during refill")]
    Capability(#[from] CapError),
    #[error("no RAM for a new CNode")]
    Ram(#[from] RamAllocError),
}

impl SlotError {
    /// Whether the failure means "no slots" rather than a broken request.
    #[inline]
    #[must_use]
    pub const fn is_out_of_metadata(&self) -> bool {
        matches!(self, Self::OutOfSlots { .. })
    }
}
