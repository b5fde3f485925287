use crate::list::RegionList;
use aos_caps::{CNodeRef, CapOps, CapRef, ObjType};
use aos_info::memory::{BASE_PAGE_SIZE, OBJSIZE_L2CNODE};
use aos_slot::{CNodeSource, SlotError};

/// Creates `CNode`s from RAM carved directly out of an allocator's list.
///
/// The carver never asks a slot allocator for slots: the refilling
/// allocator supplies both destination slots, which is what lets the
/// physical allocator refill its own slot allocator.
pub struct CNodeCarver<'a, K: ?Sized> {
    pub(crate) list: &'a mut RegionList,
    pub(crate) kernel: &'a mut K,
}

impl<K: CapOps + ?Sized> CNodeCarver<'_, K> {
    fn undo(&mut self, key: aos_slab::SlabKey) {
        if let Err(e) = self.list.release(self.kernel, key) {
            log::error!("failed to return CNode backing after error: {e}");
        }
    }
}

impl<K: CapOps + ?Sized> CNodeSource for CNodeCarver<'_, K> {
    fn create_cnode(&mut self, ram_slot: CapRef, cnode_slot: CapRef) -> Result<CNodeRef, SlotError> {
        let key = self
            .list
            .carve(self.kernel, ram_slot, OBJSIZE_L2CNODE, BASE_PAGE_SIZE, ObjType::Ram)
            .map_err(|e| SlotError::Ram(e.into()))?;

        if let Err(e) = self.kernel.retype(
            cnode_slot,
            ram_slot,
            0,
            ObjType::L2CNode,
            OBJSIZE_L2CNODE,
            1,
        ) {
            self.undo(key);
            return Err(e.into());
        }

        match self.kernel.cnode_ref(cnode_slot) {
            Ok(cnode) => {
                log::trace!("carved {cnode:?} into {cnode_slot}");
                Ok(cnode)
            }
            Err(e) => {
                if let Err(d) = self.kernel.destroy(cnode_slot) {
                    log::error!("failed to destroy half-created CNode {cnode_slot}: {d}");
                }
                self.undo(key);
                Err(e.into())
            }
        }
    }
}
