use aos_addresses::PhysicalAddress;
use aos_caps::CapRef;
use aos_slab::SlabKey;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NodeKind {
    /// A donated capability; owns the provenance of everything carved from it.
    Parent { cap: CapRef },
    /// Available range inside `parent`.
    Free { parent: SlabKey },
    /// Range handed out as `cap`, minted from `parent`.
    Allocated { parent: SlabKey, cap: CapRef },
    /// Pre-allocated for a split, not linked into any chain.
    Spare,
}

#[derive(Debug, Clone)]
pub struct MmNode {
    pub base: PhysicalAddress,
    pub size: u64,
    pub kind: NodeKind,
    pub prev: Option<SlabKey>,
    pub next: Option<SlabKey>,
}

impl MmNode {
    pub const fn new(base: PhysicalAddress, size: u64, kind: NodeKind) -> Self {
        Self {
            base,
            size,
            kind,
            prev: None,
            next: None,
        }
    }

    pub const fn spare() -> Self {
        Self::new(PhysicalAddress::zero(), 0, NodeKind::Spare)
    }

    pub const fn end(&self) -> u64 {
        self.base.as_u64() + self.size
    }

    /// The owning Parent of a Free or Allocated node.
    pub const fn parent(&self) -> Option<SlabKey> {
        match self.kind {
            NodeKind::Free { parent } | NodeKind::Allocated { parent, .. } => Some(parent),
            NodeKind::Parent { .. } | NodeKind::Spare => None,
        }
    }
}

/// State of a tracked range.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegionState {
    Free,
    Allocated,
}

/// A snapshot of one Free or Allocated range.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RegionInfo {
    pub base: PhysicalAddress,
    pub size: u64,
    pub state: RegionState,
    /// Base of the donated region this range was carved from.
    pub parent_base: PhysicalAddress,
    /// The minted capability, for allocated ranges.
    pub cap: Option<CapRef>,
}

/// A donated region as passed to `add`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ParentInfo {
    pub cap: CapRef,
    pub base: PhysicalAddress,
    pub size: u64,
}

/// A successful allocation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Allocation {
    pub cap: CapRef,
    pub base: PhysicalAddress,
    pub size: u64,
}
