use crate::node::{Backing, VKind};
use crate::state::MapRequest;
use crate::{FrameAllocation, PAGE, PagingError, PagingState};
use aos_addresses::{Size4K, VirtualAddress};
use aos_caps::{CapOps, ObjType, RamAlloc, VnodeOps, VregionFlags};
use aos_info::memory::BASE_PAGE_SIZE;
use aos_slab::SlabRefill;
use aos_slot::SlotAllocator;

impl<S: SlotAllocator, R: SlabRefill> PagingState<S, R> {
    /// Allocates `bytes` of RAM from `ram` and retypes it into a frame in a
    /// fresh slot.
    ///
    /// # Errors
    /// * [`PagingError::RamAlloc`] if `ram` has no memory left.
    /// * [`PagingError::Slots`] or [`PagingError::Capability`] if the frame
    ///   could not be created; the RAM is freed again.
    pub fn frame_alloc<K: CapOps + ?Sized, A: RamAlloc + ?Sized>(
        &mut self,
        kernel: &mut K,
        ram: &mut A,
        bytes: u64,
    ) -> Result<FrameAllocation, PagingError> {
        if bytes == 0 {
            return Err(PagingError::InvalidArgument("zero-sized frame"));
        }
        let bytes = aos_addresses::page_round_up(bytes)
            .ok_or(PagingError::InvalidArgument("frame size overflows"))?;
        let ram_cap = ram.alloc_ram(kernel, bytes, BASE_PAGE_SIZE)?;

        let undo = |kernel: &mut K, ram: &mut A| {
            if let Err(e) = ram.free_ram(kernel, ram_cap, bytes) {
                log::error!("leaking RAM {ram_cap}: {e}");
            }
        };
        let frame = match self.slots.alloc() {
            Ok(frame) => frame,
            Err(e) => {
                undo(kernel, ram);
                return Err(e.into());
            }
        };
        if let Err(e) = kernel.retype(frame, ram_cap, 0, ObjType::Frame, bytes, 1) {
            self.return_slot(frame);
            undo(kernel, ram);
            return Err(e.into());
        }
        Ok(FrameAllocation {
            frame,
            ram: ram_cap,
            bytes,
        })
    }

    /// Backs the page containing `addr` with fresh memory from `ram`.
    ///
    /// The page must lie in a range reserved by a
    /// [`PagingRegion`](crate::PagingRegion) and not be backed yet. It is
    /// mapped read-write.
    ///
    /// # Errors
    /// * [`PagingError::Segfault`] outside of reserved ranges.
    /// * Any error of [`frame_alloc`](Self::frame_alloc) or of building the
    ///   mapping; nothing is left allocated in that case.
    pub fn handle_page_fault<K: VnodeOps + ?Sized, A: RamAlloc + ?Sized>(
        &mut self,
        kernel: &mut K,
        ram: &mut A,
        addr: VirtualAddress,
    ) -> Result<(), PagingError> {
        self.maintain_nodes();

        let page = addr.align_down::<Size4K>();
        let segfault = PagingError::Segfault { addr };
        let key = self.list.containing(page).ok_or(segfault)?;
        let node = &self.list.nodes[key];
        let VKind::Reserved { region } = node.kind else {
            return Err(segfault);
        };
        if !node.contains(page, PAGE) {
            return Err(segfault);
        }

        let frame = self.frame_alloc(kernel, ram, u64::from(PAGE))?;
        let request = MapRequest {
            vaddr: page,
            bytes: PAGE,
            frame: frame.frame,
            flags: VregionFlags::READ_WRITE,
        };
        if let Err(e) = self.commit(kernel, key, request, Some(Backing { region, frame })) {
            self.return_frame(kernel, ram, frame);
            return Err(e);
        }
        log::trace!("{region}: backed {page} with {}", frame.frame);
        Ok(())
    }
}
