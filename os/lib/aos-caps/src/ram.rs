use crate::{CapOps, CapRef, RamAllocError};

/// A source of RAM capabilities.
pub trait RamAlloc {
    /// Allocates at least `bytes` of RAM aligned to `alignment` and returns
    /// a fresh capability for it.
    ///
    /// # Errors
    /// See [`RamAllocError`].
    fn alloc_ram<K: CapOps + ?Sized>(
        &mut self,
        kernel: &mut K,
        bytes: u64,
        alignment: u64,
    ) -> Result<CapRef, RamAllocError>;

    /// Returns a capability obtained from [`RamAlloc::alloc_ram`].
    ///
    /// # Errors
    /// See [`RamAllocError`].
    fn free_ram<K: CapOps + ?Sized>(
        &mut self,
        kernel: &mut K,
        cap: CapRef,
        bytes: u64,
    ) -> Result<(), RamAllocError>;
}
