use crate::carver::CNodeCarver;
use crate::list::RegionList;
use crate::node::{Allocation, MmNode, NodeKind, ParentInfo, RegionInfo, RegionState};
use crate::MmError;
use aos_addresses::{PhysicalAddress, Size4K, page_round_up};
use aos_caps::{CapOps, CapRef, ObjType};
use aos_info::memory::{BASE_PAGE_SIZE, SLAB_LOW_WATERMARK};
use aos_slab::{DefaultRefill, SlabRefill};
use aos_slot::SlotAllocator;

/// Physical memory allocator over donated capabilities.
///
/// Each call to [`add`](Self::add) registers a capability as a Parent whose
/// range starts out as one Free node. Allocations mint a new capability by
/// retyping the Parent at the allocated offset and split the Free node around
/// it; frees destroy that capability and merge the range back, but only with
/// Free neighbours carved from the same Parent.
///
/// Metadata comes from two strategies fixed at construction: a
/// [`SlabRefill`] for list nodes and a [`SlotAllocator`] for the slots new
/// capabilities land in. Both are topped up at the start of every
/// allocation, before anything is committed.
pub struct PhysicalMemoryAllocator<S, R = DefaultRefill> {
    objtype: ObjType,
    list: RegionList,
    slots: S,
    slab_refill: R,
}

impl<S: SlotAllocator> PhysicalMemoryAllocator<S, DefaultRefill> {
    /// Creates an allocator minting capabilities of type `objtype`, with the
    /// page-at-a-time slab grower.
    #[must_use]
    pub const fn new(objtype: ObjType, slots: S) -> Self {
        Self::with_refill(objtype, slots, DefaultRefill)
    }
}

impl<S: SlotAllocator, R: SlabRefill> PhysicalMemoryAllocator<S, R> {
    #[must_use]
    pub const fn with_refill(objtype: ObjType, slots: S, slab_refill: R) -> Self {
        Self {
            objtype,
            list: RegionList::new(),
            slots,
            slab_refill,
        }
    }

    /// Seeds the node pool with `count` nodes without consulting the refill
    /// strategy.
    pub fn grow_nodes(&mut self, count: usize) -> usize {
        self.list.nodes.grow_blocks(count)
    }

    /// Grows the node pool through the refill strategy.
    ///
    /// # Errors
    /// [`MmError::OutOfNodes`] if the strategy has nothing left,
    /// [`MmError::ReentrancyViolation`] if a refill is already running.
    pub fn refill_nodes(&mut self) -> Result<usize, MmError> {
        Ok(self.list.nodes.refill(&mut self.slab_refill)?)
    }

    /// Refills the slot allocator, carving `CNode` backing from this
    /// allocator's own free memory.
    ///
    /// # Errors
    /// Whatever the slot allocator reports.
    pub fn refill_slots<K: CapOps + ?Sized>(&mut self, kernel: &mut K) -> Result<bool, MmError> {
        self.maintain_nodes();
        let mut carver = CNodeCarver {
            list: &mut self.list,
            kernel,
        };
        Ok(self.slots.refill(&mut carver)?)
    }

    /// A `CNode` source backed by this allocator, for refilling other slot
    /// allocators.
    pub fn cnode_source<'a, K: CapOps + ?Sized>(&'a mut self, kernel: &'a mut K) -> CNodeCarver<'a, K> {
        CNodeCarver {
            list: &mut self.list,
            kernel,
        }
    }

    /// Registers the capability `cap` for `[base, base + size)`.
    ///
    /// # Errors
    /// * [`MmError::InvalidArgument`] for an empty, unaligned or wrapping range.
    /// * [`MmError::InvalidRegion`] if the range overlaps an earlier one.
    /// * [`MmError::OutOfNodes`] if the two nodes cannot be allocated; the
    ///   allocator is unchanged.
    pub fn add(&mut self, cap: CapRef, base: PhysicalAddress, size: u64) -> Result<(), MmError> {
        if size == 0 {
            return Err(MmError::InvalidArgument("empty region"));
        }
        if !base.is_aligned::<Size4K>() || !size.is_multiple_of(BASE_PAGE_SIZE) {
            return Err(MmError::InvalidArgument("region is not page aligned"));
        }
        if base.checked_add(size).is_none() {
            return Err(MmError::InvalidArgument("region wraps the address space"));
        }
        if self.list.overlaps_parent(base, size) {
            return Err(MmError::InvalidRegion { base, size });
        }

        let parent = self
            .list
            .nodes
            .alloc(MmNode::new(base, size, NodeKind::Parent { cap }))
            .ok_or(MmError::OutOfNodes)?;
        let Some(free) = self
            .list
            .nodes
            .alloc(MmNode::new(base, size, NodeKind::Free { parent }))
        else {
            self.list.nodes.free(parent);
            return Err(MmError::OutOfNodes);
        };
        self.list.insert_sorted(parent);
        self.list.insert_sorted(free);
        log::debug!("added {base}+{size:#x} from {cap}");
        Ok(())
    }

    /// Allocates `size` bytes at an `alignment` boundary and mints a
    /// capability for them.
    ///
    /// Both values are rounded up to whole pages. The Free list is scanned
    /// first-fit.
    ///
    /// # Errors
    /// * [`MmError::OutOfMemory`] if no Free range fits.
    /// * [`MmError::OutOfNodes`] or [`MmError::Slots`] if metadata ran out.
    /// * [`MmError::Capability`] if the kernel refused the retype.
    ///
    /// On every error the list is unchanged.
    pub fn alloc_aligned<K: CapOps + ?Sized>(
        &mut self,
        kernel: &mut K,
        size: u64,
        alignment: u64,
    ) -> Result<Allocation, MmError> {
        if size == 0 {
            return Err(MmError::InvalidArgument("zero-sized allocation"));
        }
        let size = page_round_up(size).ok_or(MmError::InvalidArgument("size overflows"))?;
        let alignment = page_round_up(alignment.max(BASE_PAGE_SIZE))
            .ok_or(MmError::InvalidArgument("alignment overflows"))?;

        self.maintain_nodes();
        self.maintain_slots(kernel);

        let dest = self.slots.alloc()?;
        match self.list.carve(kernel, dest, size, alignment, self.objtype) {
            Ok(key) => {
                let base = self.list.nodes[key].base;
                log::trace!("allocated {base}+{size:#x} as {dest}");
                Ok(Allocation {
                    cap: dest,
                    base,
                    size,
                })
            }
            Err(e) => {
                if let Err(se) = self.slots.free(dest) {
                    log::warn!("failed to return slot {dest}: {se}");
                }
                Err(e)
            }
        }
    }

    /// Allocates `size` bytes at page alignment.
    ///
    /// # Errors
    /// See [`alloc_aligned`](Self::alloc_aligned).
    pub fn alloc<K: CapOps + ?Sized>(&mut self, kernel: &mut K, size: u64) -> Result<Allocation, MmError> {
        self.alloc_aligned(kernel, size, BASE_PAGE_SIZE)
    }

    /// Returns the allocation `[base, base + size)` held in `cap`.
    ///
    /// `size` is rounded up to whole pages and must then match the
    /// allocation exactly. The capability is destroyed before the range is
    /// merged back, so a kernel error leaves the allocation in place.
    ///
    /// # Errors
    /// * [`MmError::InvalidRegion`] if no allocation matches.
    /// * [`MmError::Capability`] if the capability cannot be destroyed.
    pub fn free<K: CapOps + ?Sized>(
        &mut self,
        kernel: &mut K,
        cap: CapRef,
        base: PhysicalAddress,
        size: u64,
    ) -> Result<(), MmError> {
        let invalid = MmError::InvalidRegion { base, size };
        let rounded = page_round_up(size).ok_or(invalid)?;
        let key = self.list.find_allocated(base, rounded).ok_or(invalid)?;
        if !matches!(self.list.nodes[key].kind, NodeKind::Allocated { cap: held, .. } if held == cap) {
            return Err(invalid);
        }

        self.list.release(kernel, key)?;
        if let Err(e) = self.slots.free(cap) {
            log::warn!("failed to return slot {cap}: {e}");
        }
        log::trace!("freed {base}+{rounded:#x}");
        Ok(())
    }

    /// Revokes and deletes every donated capability.
    ///
    /// Node and slot metadata is not reclaimed. Every Parent is attempted
    /// even if an earlier one fails.
    ///
    /// # Errors
    /// The first capability error encountered.
    pub fn destroy<K: CapOps + ?Sized>(self, kernel: &mut K) -> Result<(), MmError> {
        let mut first = None;
        for parent in self.parents() {
            let result = kernel
                .revoke(parent.cap)
                .and_then(|()| kernel.destroy(parent.cap));
            if let Err(e) = result {
                log::error!("failed to release {}: {e}", parent.cap);
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), |e| Err(e.into()))
    }

    /// The Free and Allocated ranges in address order.
    pub fn regions(&self) -> impl Iterator<Item = RegionInfo> + '_ {
        self.list.regions().filter_map(|(_, n)| {
            let (state, cap) = match n.kind {
                NodeKind::Free { .. } => (RegionState::Free, None),
                NodeKind::Allocated { cap, .. } => (RegionState::Allocated, Some(cap)),
                NodeKind::Parent { .. } | NodeKind::Spare => return None,
            };
            let parent = n.parent()?;
            Some(RegionInfo {
                base: n.base,
                size: n.size,
                state,
                parent_base: self.list.nodes[parent].base,
                cap,
            })
        })
    }

    /// The donated regions in address order.
    pub fn parents(&self) -> impl Iterator<Item = ParentInfo> + '_ {
        self.list.parents().filter_map(|(_, n)| match n.kind {
            NodeKind::Parent { cap } => Some(ParentInfo {
                cap,
                base: n.base,
                size: n.size,
            }),
            _ => None,
        })
    }

    /// Bytes currently available for allocation.
    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.regions()
            .filter(|r| r.state == RegionState::Free)
            .map(|r| r.size)
            .sum()
    }

    /// Bytes ever added.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.parents().map(|p| p.size).sum()
    }

    /// Nodes left in the pool.
    #[must_use]
    pub const fn free_nodes(&self) -> usize {
        self.list.nodes.free_count()
    }

    #[must_use]
    pub const fn objtype(&self) -> ObjType {
        self.objtype
    }

    #[must_use]
    pub const fn slots(&self) -> &S {
        &self.slots
    }

    pub const fn slots_mut(&mut self) -> &mut S {
        &mut self.slots
    }

    fn maintain_nodes(&mut self) {
        if !self.list.nodes.needs_refill(SLAB_LOW_WATERMARK) {
            return;
        }
        match self.list.nodes.refill(&mut self.slab_refill) {
            Ok(n) => log::trace!("node pool grown by {n}"),
            Err(e) => log::warn!("node pool refill failed: {e}"),
        }
    }

    fn maintain_slots<K: CapOps + ?Sized>(&mut self, kernel: &mut K) {
        if !self.slots.needs_refill() {
            return;
        }
        let mut carver = CNodeCarver {
            list: &mut self.list,
            kernel,
        };
        if let Err(e) = self.slots.refill(&mut carver) {
            log::warn!("slot refill failed: {e}");
        }
    }
}
