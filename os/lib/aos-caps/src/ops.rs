use crate::{CNodeRef, CapError, CapRef, FrameIdentity, ObjType, VregionFlags};

/// Capability operations offered by the kernel.
///
/// Every operation is atomic from the caller's point of view: on error the
/// kernel has not changed any slot.
pub trait CapOps {
    /// Creates `count` objects of type `ty` and `objsize` bytes each from
    /// `src`, starting `offset` bytes into it, in consecutive slots from `dest`.
    ///
    /// # Errors
    /// Fails when the source is missing or of the wrong type, when the range
    /// exceeds the source or overlaps an existing descendant, or when a
    /// destination slot is occupied.
    fn retype(
        &mut self,
        dest: CapRef,
        src: CapRef,
        offset: u64,
        ty: ObjType,
        objsize: u64,
        count: usize,
    ) -> Result<(), CapError>;

    /// Deletes the capability in `cap`, leaving the slot empty.
    ///
    /// # Errors
    /// Fails when the slot is empty.
    fn destroy(&mut self, cap: CapRef) -> Result<(), CapError>;

    /// Deletes every descendant of `cap`; `cap` itself survives.
    ///
    /// # Errors
    /// Fails when the slot is empty.
    fn revoke(&mut self, cap: CapRef) -> Result<(), CapError>;

    /// Reports the physical range of a memory capability.
    ///
    /// # Errors
    /// Fails when the slot is empty or does not hold memory.
    fn identify(&self, cap: CapRef) -> Result<FrameIdentity, CapError>;

    /// Resolves a `CNode` capability to the table it names.
    ///
    /// # Errors
    /// Fails when the slot is empty or does not hold a `CNode`.
    fn cnode_ref(&self, cap: CapRef) -> Result<CNodeRef, CapError>;
}

/// A run of page-table entries to install with one [`VnodeOps::vnode_map`] call.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MapRange {
    /// First entry in the table.
    pub slot: u16,
    /// Byte offset into the mapped object.
    pub offset: u64,
    /// Number of consecutive entries.
    pub pte_count: u16,
    pub flags: VregionFlags,
}

impl MapRange {
    /// A single entry mapping the start of an object.
    #[inline]
    #[must_use]
    pub const fn single(slot: u16, flags: VregionFlags) -> Self {
        Self {
            slot,
            offset: 0,
            pte_count: 1,
            flags,
        }
    }
}

/// Page-table operations offered by the kernel.
pub trait VnodeOps: CapOps {
    /// Creates a page table of type `ty` in `dest`.
    ///
    /// # Errors
    /// Fails when `ty` is not a page-table type or `dest` is occupied.
    fn vnode_create(&mut self, dest: CapRef, ty: ObjType) -> Result<(), CapError>;

    /// Installs `range` of `table`, pointing at `src`, and records the
    /// installation in the mapping capability `mapping`.
    ///
    /// # Errors
    /// Fails on a type mismatch, when entries are in use or out of range, or
    /// when the mapped range exceeds `src`.
    fn vnode_map(
        &mut self,
        table: CapRef,
        src: CapRef,
        mapping: CapRef,
        range: MapRange,
    ) -> Result<(), CapError>;

    /// Removes the entries recorded in `mapping` from `table`.
    ///
    /// # Errors
    /// Fails when `mapping` does not describe entries of `table`.
    fn vnode_unmap(&mut self, table: CapRef, mapping: CapRef) -> Result<(), CapError>;
}
