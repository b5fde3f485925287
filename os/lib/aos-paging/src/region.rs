use crate::node::{RegionId, VKind};
use crate::{FrameAllocation, PAGE, PagingError, PagingState, page_round_up};
use aos_addresses::VirtualAddress;
use aos_caps::{RamAlloc, VnodeOps};
use aos_slab::{SlabKey, SlabRefill};
use aos_slot::SlotAllocator;
use alloc::vec::Vec;

/// A reserved stretch of address space handed out piecewise.
///
/// The range is claimed in the [`PagingState`] when the region is created,
/// but no memory is mapped: [`map`](Self::map) only moves a cursor, and
/// pages are backed on first touch by
/// [`handle_page_fault`](PagingState::handle_page_fault).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PagingRegion {
    id: RegionId,
    base: VirtualAddress,
    current: VirtualAddress,
    size: u32,
}

impl PagingRegion {
    #[must_use]
    pub const fn id(&self) -> RegionId {
        self.id
    }

    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.base
    }

    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// First address not yet handed out.
    #[must_use]
    pub const fn current(&self) -> VirtualAddress {
        self.current
    }

    /// Bytes not yet handed out.
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.size - self.current.offset_from(self.base)
    }

    /// Whether `[vaddr, vaddr + bytes)` lies inside the region.
    #[must_use]
    pub fn contains(&self, vaddr: VirtualAddress, bytes: u32) -> bool {
        self.base <= vaddr
            && vaddr.as_u64() + u64::from(bytes) <= self.base.as_u64() + u64::from(self.size)
    }

    /// Hands out the next `req` bytes of the region.
    ///
    /// If less than `req` is left, the rest of the region is returned
    /// instead and the returned length says how much that is.
    ///
    /// # Errors
    /// [`PagingError::RegionExhausted`] once nothing is left.
    pub fn map(&mut self, req: u32) -> Result<(VirtualAddress, u32), PagingError> {
        let rem = self.remaining();
        let granted = if rem > req {
            req
        } else if rem > 0 {
            log::warn!("{}: returning remaining {rem:#x} bytes for a request of {req:#x}", self.id);
            rem
        } else {
            return Err(PagingError::RegionExhausted);
        };
        let vaddr = self.current;
        self.current += granted;
        Ok((vaddr, granted))
    }
}

impl<S: SlotAllocator, R: SlabRefill> PagingState<S, R> {
    /// Reserves `bytes` of address space for a new [`PagingRegion`].
    ///
    /// # Errors
    /// * [`PagingError::OutOfVirtualMemory`] if no Free range fits.
    /// * [`PagingError::OutOfNodes`] if the range cannot be split off.
    pub fn region_init(&mut self, bytes: u32) -> Result<PagingRegion, PagingError> {
        if bytes == 0 {
            return Err(PagingError::InvalidArgument("empty paging region"));
        }
        let bytes = page_round_up(bytes)?;
        self.maintain_nodes();

        let (key, base) = self
            .find_vacant(bytes, PAGE, &VKind::Free)
            .ok_or(PagingError::OutOfVirtualMemory)?;
        let id = RegionId(self.next_region);
        self.list.split(key, base, bytes, VKind::Reserved { region: id })?;
        self.next_region = self.next_region.wrapping_add(1);

        log::debug!("{id} reserved at {base}+{bytes:#x}");
        Ok(PagingRegion {
            id,
            base,
            current: base,
            size: bytes,
        })
    }

    /// Unmaps the pages of `region` that were backed on fault inside
    /// `[base, base + bytes)` and returns their memory to `ram`.
    ///
    /// The range stays reserved, so touching it again faults in fresh
    /// memory. Returns the number of pages unmapped.
    ///
    /// # Errors
    /// * [`PagingError::InvalidRegion`] if the range is not inside `region`.
    /// * [`PagingError::Capability`] if a page could not be unmapped; pages
    ///   handled before it stay unmapped.
    pub fn region_unmap<K: VnodeOps + ?Sized, A: RamAlloc + ?Sized>(
        &mut self,
        kernel: &mut K,
        ram: &mut A,
        region: &PagingRegion,
        base: VirtualAddress,
        bytes: u32,
    ) -> Result<usize, PagingError> {
        if bytes == 0 || !region.contains(base, bytes) {
            return Err(PagingError::InvalidRegion);
        }
        let end = base.as_u64() + u64::from(bytes);
        let backed: Vec<SlabKey> = self
            .list
            .iter()
            .filter(|(_, n)| {
                matches!(&n.kind, VKind::Allocated { backing: Some(b), .. } if b.region == region.id)
                    && n.base.as_u64() < end
                    && base.as_u64() < n.end()
            })
            .map(|(k, _)| k)
            .collect();

        let mut count = 0;
        for key in backed {
            let backing = self.release(kernel, key, VKind::Reserved { region: region.id })?;
            if let Some(b) = backing {
                self.return_frame(kernel, ram, b.frame);
            }
            count += 1;
        }
        log::debug!("{}: unmapped {count} pages from {base}+{bytes:#x}", region.id);
        Ok(count)
    }

    /// Deletes the frame capability of `frame` and frees its RAM. Failures
    /// only leak.
    pub(crate) fn return_frame<K: VnodeOps + ?Sized, A: RamAlloc + ?Sized>(
        &mut self,
        kernel: &mut K,
        ram: &mut A,
        frame: FrameAllocation,
    ) {
        self.discard(kernel, frame.frame);
        if let Err(e) = ram.free_ram(kernel, frame.ram, frame.bytes) {
            log::error!("leaking RAM {}: {e}", frame.ram);
        }
    }
}
