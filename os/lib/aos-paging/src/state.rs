use crate::list::VRegionList;
use crate::node::{Backing, PageMapping, VKind, VNode, VRegionInfo, VRegionState};
use crate::tables::L2Table;
use crate::{PAGE, PagingError};
use aos_addresses::{Size4K, VirtualAddress};
use aos_caps::{CapRef, VnodeOps, VregionFlags};
use aos_info::memory::{L1_PAGETABLE_ENTRIES, PAGING_BOOTSTRAP_NODES, SLAB_LOW_WATERMARK, VADDR_LIMIT};
use aos_slab::{DefaultRefill, SlabKey, SlabRefill};
use aos_slot::{CNodeSource, SlotAllocator};
use alloc::vec;
use alloc::vec::Vec;

/// Rounds `bytes` up to whole pages.
pub(crate) fn page_round_up(bytes: u32) -> Result<u32, PagingError> {
    bytes
        .checked_next_multiple_of(PAGE)
        .ok_or(PagingError::InvalidArgument("size overflows the address space"))
}

/// A page-granular mapping to install into a vacant range.
#[derive(Debug, Copy, Clone)]
pub(crate) struct MapRequest {
    pub vaddr: VirtualAddress,
    pub bytes: u32,
    pub frame: CapRef,
    pub flags: VregionFlags,
}

/// Virtual address-space allocator of one domain.
///
/// Tracks which parts of `[start, 0xFFFF_FFFF)` are free, reserved for a
/// [`PagingRegion`](crate::PagingRegion) or mapped, and owns the
/// second-level page tables below the root table. Allocation is split in two
/// phases: [`alloc`](Self::alloc) only finds a range, and
/// [`map_fixed_attr`](Self::map_fixed_attr) commits a frame to it.
pub struct PagingState<S, R = DefaultRefill> {
    pub(crate) start: VirtualAddress,
    pub(crate) root: CapRef,
    pub(crate) slots: S,
    pub(crate) list: VRegionList,
    pub(crate) tables: Vec<Option<L2Table>>,
    pub(crate) slab_refill: R,
    pub(crate) next_region: u32,
}

impl<S: SlotAllocator> PagingState<S, DefaultRefill> {
    /// Sets up the allocator for the address space with first-level table
    /// `root`, managing everything from `start` upwards.
    ///
    /// # Errors
    /// [`PagingError::Unaligned`] if `start` is not page aligned.
    pub fn new(start: VirtualAddress, root: CapRef, slots: S) -> Result<Self, PagingError> {
        Self::with_refill(start, root, slots, DefaultRefill)
    }
}

impl<S: SlotAllocator, R: SlabRefill> PagingState<S, R> {
    /// Like [`new`](PagingState::new), with a custom node pool grower.
    ///
    /// # Errors
    /// [`PagingError::Unaligned`] if `start` is not page aligned.
    pub fn with_refill(start: VirtualAddress, root: CapRef, slots: S, slab_refill: R) -> Result<Self, PagingError> {
        if !start.is_aligned::<Size4K>() {
            return Err(PagingError::Unaligned(start));
        }
        let size = VADDR_LIMIT - start.as_u32();

        let mut list = VRegionList::new();
        list.nodes.grow_blocks(PAGING_BOOTSTRAP_NODES);
        list.seed(VNode::new(start, size, VKind::Free))?;
        log::debug!("paging state for {root} starts at {start}");

        Ok(Self {
            start,
            root,
            slots,
            list,
            tables: vec![None; L1_PAGETABLE_ENTRIES],
            slab_refill,
            next_region: 0,
        })
    }

    /// Finds `bytes` of unused address space, without claiming it.
    ///
    /// # Errors
    /// [`PagingError::OutOfVirtualMemory`] if no Free range is large enough.
    pub fn alloc(&self, bytes: u32) -> Result<VirtualAddress, PagingError> {
        self.alloc_aligned(bytes, PAGE)
    }

    /// Like [`alloc`](Self::alloc), with the result aligned to `alignment`
    /// (rounded up to whole pages).
    ///
    /// # Errors
    /// [`PagingError::OutOfVirtualMemory`] if no Free range fits.
    pub fn alloc_aligned(&self, bytes: u32, alignment: u32) -> Result<VirtualAddress, PagingError> {
        if bytes == 0 {
            return Err(PagingError::InvalidArgument("zero-sized allocation"));
        }
        let bytes = page_round_up(bytes)?;
        let alignment = page_round_up(alignment.max(PAGE))?;
        self.find_vacant(bytes, alignment, &VKind::Free)
            .map(|(_, vaddr)| vaddr)
            .ok_or(PagingError::OutOfVirtualMemory)
    }

    /// First node of kind `kind` that fits `bytes` at `alignment`.
    pub(crate) fn find_vacant(&self, bytes: u32, alignment: u32, kind: &VKind) -> Option<(SlabKey, VirtualAddress)> {
        self.list.iter().filter(|(_, n)| n.kind == *kind).find_map(|(k, n)| {
            let vaddr = VirtualAddress::new(n.base.as_u32().checked_next_multiple_of(alignment)?);
            n.contains(vaddr, bytes).then_some((k, vaddr))
        })
    }

    /// Maps `bytes` of `frame` at exactly `vaddr` with `flags`.
    ///
    /// Second-level tables are created on demand, and every page gets its
    /// own page-sized frame capability retyped from `frame`.
    ///
    /// # Errors
    /// * [`PagingError::Unaligned`] if `vaddr` is not page aligned.
    /// * [`PagingError::RegionMapFailed`] unless the whole range lies in one
    ///   Free range.
    /// * [`PagingError::OutOfNodes`], [`PagingError::Slots`] or
    ///   [`PagingError::Capability`] if the mapping could not be built.
    ///
    /// On every error the address space is unchanged.
    pub fn map_fixed_attr<K: VnodeOps + ?Sized>(
        &mut self,
        kernel: &mut K,
        vaddr: VirtualAddress,
        frame: CapRef,
        bytes: u32,
        flags: VregionFlags,
    ) -> Result<(), PagingError> {
        if bytes == 0 {
            return Err(PagingError::InvalidArgument("zero-sized mapping"));
        }
        if !vaddr.is_aligned::<Size4K>() {
            return Err(PagingError::Unaligned(vaddr));
        }
        let bytes = page_round_up(bytes)?;
        self.maintain_nodes();

        let failed = PagingError::RegionMapFailed { vaddr, bytes };
        let key = self.list.containing(vaddr).ok_or(failed)?;
        let node = &self.list.nodes[key];
        if node.kind != VKind::Free || !node.contains(vaddr, bytes) {
            return Err(failed);
        }

        let request = MapRequest {
            vaddr,
            bytes,
            frame,
            flags,
        };
        self.commit(kernel, key, request, None)?;
        log::debug!("mapped {frame} at {vaddr}+{bytes:#x}");
        Ok(())
    }

    /// Maps `bytes` of `frame` wherever there is room.
    ///
    /// # Errors
    /// [`PagingError::OutOfVirtualMemory`] or any error of
    /// [`map_fixed_attr`](Self::map_fixed_attr).
    pub fn map_frame_attr<K: VnodeOps + ?Sized>(
        &mut self,
        kernel: &mut K,
        frame: CapRef,
        bytes: u32,
        flags: VregionFlags,
    ) -> Result<VirtualAddress, PagingError> {
        self.maintain_nodes();
        let vaddr = self.alloc(bytes)?;
        self.map_fixed_attr(kernel, vaddr, frame, bytes, flags)?;
        Ok(vaddr)
    }

    /// Removes the mapping that starts at `vaddr` and frees its range.
    ///
    /// Only mappings made with [`map_fixed_attr`](Self::map_fixed_attr) or
    /// [`map_frame_attr`](Self::map_frame_attr) qualify; pages backing a
    /// region are returned with
    /// [`region_unmap`](Self::region_unmap). The caller's frame capability
    /// is not touched.
    ///
    /// # Errors
    /// * [`PagingError::InvalidRegion`] if no mapping starts at `vaddr`.
    /// * [`PagingError::Capability`] if a page could not be unmapped; pages
    ///   before it are gone, the rest stay mapped.
    pub fn unmap<K: VnodeOps + ?Sized>(&mut self, kernel: &mut K, vaddr: VirtualAddress) -> Result<(), PagingError> {
        let key = self
            .list
            .iter()
            .find(|(_, n)| n.base == vaddr && matches!(n.kind, VKind::Allocated { backing: None, .. }))
            .map(|(k, _)| k)
            .ok_or(PagingError::InvalidRegion)?;
        self.release(kernel, key, VKind::Free)?;
        log::debug!("unmapped {vaddr}");
        Ok(())
    }

    /// Maps `request` into vacant node `key`, turning the range into an
    /// Allocated node. On error the range is vacant again.
    pub(crate) fn commit<K: VnodeOps + ?Sized>(
        &mut self,
        kernel: &mut K,
        key: SlabKey,
        request: MapRequest,
        backing: Option<Backing>,
    ) -> Result<SlabKey, PagingError> {
        let vacancy = self.list.nodes[key].kind.clone();
        let allocated = VKind::Allocated {
            pages: Vec::new(),
            backing,
        };
        let key = self.list.split(key, request.vaddr, request.bytes, allocated)?;

        match self.map_pages(kernel, request.vaddr, request.frame, request.bytes / PAGE, request.flags) {
            Ok(mapped) => {
                if let VKind::Allocated { pages, .. } = &mut self.list.nodes[key].kind {
                    *pages = mapped;
                }
                Ok(key)
            }
            Err(e) => {
                self.list.settle(key, vacancy);
                Err(e)
            }
        }
    }

    /// Unmaps every page of Allocated node `key` and turns it into the
    /// vacant `kind`. Returns the node's backing frame, if any.
    pub(crate) fn release<K: VnodeOps + ?Sized>(
        &mut self,
        kernel: &mut K,
        key: SlabKey,
        kind: VKind,
    ) -> Result<Option<Backing>, PagingError> {
        let VKind::Allocated { pages, backing } = &mut self.list.nodes[key].kind else {
            return Err(PagingError::InvalidRegion);
        };
        let mut pages: Vec<PageMapping> = core::mem::take(pages);
        let backing = *backing;

        if let Err(e) = self.unmap_pages(kernel, &mut pages) {
            if let VKind::Allocated { pages: left, .. } = &mut self.list.nodes[key].kind {
                *left = pages;
            }
            return Err(e);
        }
        self.list.settle(key, kind);
        Ok(backing)
    }

    /// Refills the slot allocator from `source`.
    ///
    /// # Errors
    /// Whatever the slot allocator reports.
    pub fn refill_slots(&mut self, source: &mut dyn CNodeSource) -> Result<bool, PagingError> {
        Ok(self.slots.refill(source)?)
    }

    /// Grows the node pool through the refill strategy.
    ///
    /// # Errors
    /// [`PagingError::OutOfNodes`] if the strategy has nothing left.
    pub fn refill_nodes(&mut self) -> Result<usize, PagingError> {
        Ok(self.list.nodes.refill(&mut self.slab_refill)?)
    }

    /// Seeds the node pool with `count` nodes.
    pub fn grow_nodes(&mut self, count: usize) -> usize {
        self.list.nodes.grow_blocks(count)
    }

    pub(crate) fn maintain_nodes(&mut self) {
        if !self.list.nodes.needs_refill(SLAB_LOW_WATERMARK) {
            return;
        }
        match self.list.nodes.refill(&mut self.slab_refill) {
            Ok(n) => log::trace!("virtual node pool grown by {n}"),
            Err(e) => log::warn!("virtual node pool refill failed: {e}"),
        }
    }

    /// The ranges of the managed address space in address order.
    pub fn regions(&self) -> impl Iterator<Item = VRegionInfo> + '_ {
        self.list.iter().map(|(_, n)| {
            let (state, pages) = match &n.kind {
                VKind::Free => (VRegionState::Free, 0),
                VKind::Reserved { region } => (VRegionState::Reserved(*region), 0),
                VKind::Allocated { pages, .. } => (VRegionState::Mapped, pages.len()),
            };
            VRegionInfo {
                base: n.base,
                size: n.size,
                state,
                pages,
            }
        })
    }

    /// Number of second-level tables currently installed.
    #[must_use]
    pub fn l2_table_count(&self) -> usize {
        self.tables.iter().filter(|t| t.is_some()).count()
    }

    /// Whether the second-level table for first-level entry `l1` exists.
    #[must_use]
    pub fn is_l2_initialized(&self, l1: usize) -> bool {
        self.tables.get(l1).is_some_and(Option::is_some)
    }

    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.start
    }

    /// The first-level page table.
    #[must_use]
    pub const fn root(&self) -> CapRef {
        self.root
    }

    /// Nodes left in the pool.
    #[must_use]
    pub const fn free_nodes(&self) -> usize {
        self.list.nodes.free_count()
    }

    #[must_use]
    pub const fn slots(&self) -> &S {
        &self.slots
    }

    pub const fn slots_mut(&mut self) -> &mut S {
        &mut self.slots
    }
}
