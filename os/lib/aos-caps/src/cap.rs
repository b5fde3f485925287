use core::fmt;

/// Opaque reference to a `CNode`, a table of capability slots.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CNodeRef(u32);

impl CNodeRef {
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for CNodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CNode({:#x})", self.0)
    }
}

/// A capability slot: a `CNode` plus an index into it.
///
/// A `CapRef` names a slot, not an object. It may be empty, hold a
/// capability, or be the destination of a pending retype.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CapRef {
    pub cnode: CNodeRef,
    pub slot: u32,
}

impl CapRef {
    #[inline]
    #[must_use]
    pub const fn new(cnode: CNodeRef, slot: u32) -> Self {
        Self { cnode, slot }
    }

    /// The slot `n` entries after this one in the same `CNode`.
    #[inline]
    #[must_use]
    pub const fn offset(self, n: u32) -> Self {
        Self {
            cnode: self.cnode,
            slot: self.slot + n,
        }
    }
}

impl fmt::Debug for CapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cap({:#x}:{})", self.cnode.0, self.slot)
    }
}

impl fmt::Display for CapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Kernel object types the allocators create or consume.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ObjType {
    /// Untyped physical memory; can be retyped into anything below.
    Ram,
    /// Mappable RAM.
    Frame,
    /// Mappable device memory.
    DevFrame,
    /// Second-level capability table.
    L2CNode,
    /// First-level ARM page table.
    VNodeArmL1,
    /// Second-level ARM page table.
    VNodeArmL2,
    /// Record of a range of page-table entries.
    Mapping,
}

impl ObjType {
    /// Whether this object names a range of physical memory.
    #[inline]
    #[must_use]
    pub const fn is_memory(self) -> bool {
        matches!(self, Self::Ram | Self::Frame | Self::DevFrame)
    }

    #[inline]
    #[must_use]
    pub const fn is_vnode(self) -> bool {
        matches!(self, Self::VNodeArmL1 | Self::VNodeArmL2)
    }

    /// Whether the kernel accepts a retype from `self` into `to`.
    #[must_use]
    pub const fn can_retype_into(self, to: Self) -> bool {
        match self {
            Self::Ram => matches!(
                to,
                Self::Ram | Self::Frame | Self::L2CNode | Self::VNodeArmL1 | Self::VNodeArmL2
            ),
            Self::Frame => matches!(to, Self::Frame),
            Self::DevFrame => matches!(to, Self::DevFrame),
            _ => false,
        }
    }
}

/// Result of identifying a memory capability.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FrameIdentity {
    /// Physical base address.
    pub base: u64,
    /// Size in bytes.
    pub bytes: u64,
}
