//! # RAM Allocation Front End
//!
//! [`RamAlloc`] on top of [`PhysicalMemoryAllocator`], and the boot-time
//! setup that builds the init domain's allocator from the kernel's memory
//! map.

use crate::PhysicalMemoryAllocator;
use aos_addresses::PhysicalAddress;
use aos_caps::{CNodeRef, CapOps, CapRef, ObjType, RamAlloc, RamAllocError};
use aos_info::boot::{BootInfo, CoreId};
use aos_info::memory::{L2_CNODE_SLOTS, MM_BOOTSTRAP_NODES};
use aos_slab::SlabRefill;
use aos_slot::{SlotAllocator, SlotPrealloc};

impl<S: SlotAllocator, R: SlabRefill> RamAlloc for PhysicalMemoryAllocator<S, R> {
    fn alloc_ram<K: CapOps + ?Sized>(
        &mut self,
        kernel: &mut K,
        bytes: u64,
        alignment: u64,
    ) -> Result<CapRef, RamAllocError> {
        Ok(self.alloc_aligned(kernel, bytes, alignment)?.cap)
    }

    /// Frees `cap`, trusting the kernel over the caller for its extent:
    /// `bytes` is clamped to the identified size of the capability.
    fn free_ram<K: CapOps + ?Sized>(
        &mut self,
        kernel: &mut K,
        cap: CapRef,
        bytes: u64,
    ) -> Result<(), RamAllocError> {
        let id = kernel.identify(cap)?;
        let bytes = bytes.min(id.bytes);
        self.free(kernel, cap, PhysicalAddress::new(id.base), bytes)?;
        Ok(())
    }
}

/// Free RAM reported at boot but left for other cores.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RemainingMemory {
    /// Base of the first region not added.
    pub base: PhysicalAddress,
    /// Total bytes across all regions not added.
    pub bytes: u64,
}

/// Outcome of [`initialize_ram_alloc`].
pub struct RamSetup {
    pub mm: PhysicalMemoryAllocator<SlotPrealloc>,
    /// Bytes registered with `mm`.
    pub added: u64,
    pub remaining: Option<RemainingMemory>,
}

/// Builds the RAM allocator of the init domain on `core`.
///
/// The free region whose ordinal equals the core id is added; the others
/// are reported in [`RamSetup::remaining`]. Capabilities for added regions
/// are taken from `mem_cnode` starting at slot 0, one slot per region, so a
/// core only ever sees the capabilities it was handed. Slots for minted
/// capabilities come from `slot_cnode`, a fresh second-level `CNode`, and
/// are replenished from the added memory itself.
///
/// A region that cannot be added is logged and skipped.
#[must_use]
pub fn initialize_ram_alloc<K: CapOps + ?Sized>(
    kernel: &mut K,
    bootinfo: &BootInfo<'_>,
    core: CoreId,
    mem_cnode: CNodeRef,
    slot_cnode: CNodeRef,
) -> RamSetup {
    let slots = SlotPrealloc::new(slot_cnode, L2_CNODE_SLOTS);
    let mut mm = PhysicalMemoryAllocator::new(ObjType::Ram, slots);
    let seeded = mm.grow_nodes(MM_BOOTSTRAP_NODES);
    log::debug!("RAM allocator seeded with {seeded} nodes");

    let mut added = 0;
    let mut next_slot = 0;
    let mut remaining: Option<RemainingMemory> = None;
    for (index, region) in bootinfo.empty_regions() {
        let base = PhysicalAddress::new(region.base);
        if index == u32::from(core.0) {
            let cap = CapRef::new(mem_cnode, next_slot);
            match mm.add(cap, base, region.bytes) {
                Ok(()) => added += region.bytes,
                Err(e) => log::warn!("adding RAM region {index} ({base}+{:#x}) failed: {e}", region.bytes),
            }
            next_slot += 1;
            if let Err(e) = mm.refill_slots(kernel) {
                log::warn!("slot refill after adding {base} failed: {e}");
            }
        } else {
            let r = remaining.get_or_insert(RemainingMemory { base, bytes: 0 });
            r.bytes += region.bytes;
        }
    }

    log::info!("added {} MiB of physical memory on {core}", added >> 20);
    if let Some(r) = remaining {
        log::debug!("{} MiB from {} left for other cores", r.bytes >> 20, r.base);
    }
    RamSetup {
        mm,
        added,
        remaining,
    }
}
