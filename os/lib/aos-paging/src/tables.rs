//! Second-level page tables and per-page mappings.

use crate::node::PageMapping;
use crate::{PAGE, PagingError, PagingState};
use aos_addresses::VirtualAddress;
use aos_caps::{CapRef, MapRange, ObjType, VnodeOps, VregionFlags};
use aos_slab::SlabRefill;
use aos_slot::SlotAllocator;
use alloc::vec::Vec;

/// A second-level table hooked into one first-level entry.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct L2Table {
    /// The table itself.
    pub cap: CapRef,
    /// Mapping capability of the first-level entry.
    pub link: CapRef,
    /// Entries currently installed.
    pub live: u16,
}

const fn l1_index(vaddr: VirtualAddress) -> u16 {
    vaddr.split().l1_index()
}

impl<S: SlotAllocator, R: SlabRefill> PagingState<S, R> {
    /// The table for first-level entry `l1`, created and linked on first use.
    fn ensure_l2<K: VnodeOps + ?Sized>(&mut self, kernel: &mut K, l1: u16) -> Result<CapRef, PagingError> {
        if let Some(t) = &self.tables[usize::from(l1)] {
            return Ok(t.cap);
        }

        let cap = self.slots.alloc()?;
        if let Err(e) = kernel.vnode_create(cap, ObjType::VNodeArmL2) {
            self.return_slot(cap);
            return Err(e.into());
        }
        let link = match self.slots.alloc() {
            Ok(link) => link,
            Err(e) => {
                self.discard(kernel, cap);
                return Err(e.into());
            }
        };
        let entry = MapRange::single(l1, VregionFlags::READ_WRITE);
        if let Err(e) = kernel.vnode_map(self.root, cap, link, entry) {
            self.return_slot(link);
            self.discard(kernel, cap);
            return Err(e.into());
        }

        self.tables[usize::from(l1)] = Some(L2Table { cap, link, live: 0 });
        log::trace!("created L2 table {l1} in {cap}");
        Ok(cap)
    }

    /// Unhooks and deletes the table of `l1` once nothing is mapped through it.
    fn release_l2_if_empty<K: VnodeOps + ?Sized>(&mut self, kernel: &mut K, l1: u16) {
        let Some(t) = self.tables[usize::from(l1)] else {
            return;
        };
        if t.live != 0 {
            return;
        }
        if let Err(e) = kernel.vnode_unmap(self.root, t.link) {
            log::warn!("keeping empty L2 table {l1}: {e}");
            return;
        }
        self.tables[usize::from(l1)] = None;
        self.discard(kernel, t.link);
        self.discard(kernel, t.cap);
        log::trace!("released L2 table {l1}");
    }

    /// Maps the page at `offset` of `frame` at `vaddr`.
    fn map_page<K: VnodeOps + ?Sized>(
        &mut self,
        kernel: &mut K,
        vaddr: VirtualAddress,
        frame: CapRef,
        offset: u64,
        flags: VregionFlags,
    ) -> Result<PageMapping, PagingError> {
        let l1 = l1_index(vaddr);
        let table = self.ensure_l2(kernel, l1)?;

        let result = self.install(kernel, table, vaddr, frame, offset, flags);
        match result {
            Ok(page) => {
                if let Some(t) = &mut self.tables[usize::from(l1)] {
                    t.live += 1;
                }
                Ok(page)
            }
            Err(e) => {
                self.release_l2_if_empty(kernel, l1);
                Err(e)
            }
        }
    }

    fn install<K: VnodeOps + ?Sized>(
        &mut self,
        kernel: &mut K,
        table: CapRef,
        vaddr: VirtualAddress,
        frame: CapRef,
        offset: u64,
        flags: VregionFlags,
    ) -> Result<PageMapping, PagingError> {
        let page = self.slots.alloc()?;
        if let Err(e) = kernel.retype(page, frame, offset, ObjType::Frame, u64::from(PAGE), 1) {
            self.return_slot(page);
            return Err(e.into());
        }
        let mapping = match self.slots.alloc() {
            Ok(m) => m,
            Err(e) => {
                self.discard(kernel, page);
                return Err(e.into());
            }
        };
        let entry = MapRange::single(vaddr.split().l2_index(), flags);
        if let Err(e) = kernel.vnode_map(table, page, mapping, entry) {
            self.return_slot(mapping);
            self.discard(kernel, page);
            return Err(e.into());
        }
        Ok(PageMapping {
            vaddr,
            frame: page,
            mapping,
        })
    }

    /// Maps `pages` consecutive pages of `frame` starting at `vaddr`. On
    /// error every page mapped so far is removed again.
    pub(crate) fn map_pages<K: VnodeOps + ?Sized>(
        &mut self,
        kernel: &mut K,
        vaddr: VirtualAddress,
        frame: CapRef,
        pages: u32,
        flags: VregionFlags,
    ) -> Result<Vec<PageMapping>, PagingError> {
        let mut mapped = Vec::new();
        for i in 0..pages {
            match self.map_page(kernel, vaddr + i * PAGE, frame, u64::from(i * PAGE), flags) {
                Ok(page) => mapped.push(page),
                Err(e) => {
                    log::debug!("mapping {vaddr} failed at page {i}: {e}");
                    if let Err(undo) = self.unmap_pages(kernel, &mut mapped) {
                        log::error!("rollback of {vaddr} incomplete: {undo}");
                    }
                    return Err(e);
                }
            }
        }
        Ok(mapped)
    }

    /// Removes `pages` from the page tables, draining the vector.
    ///
    /// Stops at the first page the kernel refuses to unmap; that page and
    /// the ones after it stay in `pages`.
    pub(crate) fn unmap_pages<K: VnodeOps + ?Sized>(
        &mut self,
        kernel: &mut K,
        pages: &mut Vec<PageMapping>,
    ) -> Result<(), PagingError> {
        let mut done = 0;
        let result = pages.iter().try_for_each(|page| {
            self.unmap_page(kernel, page)?;
            done += 1;
            Ok(())
        });
        pages.drain(..done);
        result
    }

    fn unmap_page<K: VnodeOps + ?Sized>(&mut self, kernel: &mut K, page: &PageMapping) -> Result<(), PagingError> {
        let l1 = l1_index(page.vaddr);
        let Some(table) = &mut self.tables[usize::from(l1)] else {
            panic!("page {} mapped without an L2 table", page.vaddr);
        };
        kernel.vnode_unmap(table.cap, page.mapping)?;
        table.live -= 1;

        self.discard(kernel, page.mapping);
        self.discard(kernel, page.frame);
        self.release_l2_if_empty(kernel, l1);
        Ok(())
    }

    /// Deletes `cap` and gives its slot back. Failures only leak.
    pub(crate) fn discard<K: VnodeOps + ?Sized>(&mut self, kernel: &mut K, cap: CapRef) {
        match kernel.destroy(cap) {
            Ok(()) => self.return_slot(cap),
            Err(e) => log::error!("leaking {cap}: {e}"),
        }
    }

    pub(crate) fn return_slot(&mut self, cap: CapRef) {
        if let Err(e) = self.slots.free(cap) {
            log::warn!("failed to return slot {cap}: {e}");
        }
    }
}
