//! # Simulated Kernel
//!
//! A deterministic, in-memory implementation of [`CapOps`] and [`VnodeOps`]
//! for host-side tests. It keeps a capability derivation tree and a set of
//! page tables and refuses the same operations a real capability kernel
//! would refuse:
//!
//! * retypes must stay inside the source, be page aligned, and must not
//!   overlap an existing descendant of the source;
//! * destination slots must exist and be empty;
//! * page-table entries must be unused and in range.
//!
//! Any operation can additionally be made to fail on demand with
//! [`SimKernel::fail_after`], which is how tests check that callers leave
//! their own state untouched on a kernel error.

use crate::{
    CNodeRef, CapError, CapOps, CapRef, FrameIdentity, MapRange, ObjType, VnodeOps, VregionFlags,
};
use aos_info::memory::{
    BASE_PAGE_SIZE, L1_PAGETABLE_ENTRIES, L2_CNODE_SLOTS, L2_PAGETABLE_ENTRIES, OBJSIZE_L2CNODE,
};
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;

/// Operations that can be made to fail.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SimOp {
    Retype,
    Destroy,
    Revoke,
    VnodeCreate,
    VnodeMap,
    VnodeUnmap,
}

impl SimOp {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Retype => "retype",
            Self::Destroy => "destroy",
            Self::Revoke => "revoke",
            Self::VnodeCreate => "vnode_create",
            Self::VnodeMap => "vnode_map",
            Self::VnodeUnmap => "vnode_unmap",
        }
    }
}

/// Result of walking the page tables for one virtual address.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Translation {
    pub paddr: u64,
    pub flags: VregionFlags,
}

#[derive(Debug, Copy, Clone)]
struct Pte {
    src: CapRef,
    offset: u64,
    flags: VregionFlags,
}

#[derive(Debug, Clone)]
enum Object {
    Memory,
    CNode(CNodeRef),
    VNode(BTreeMap<u16, Pte>),
    Mapping { table: CapRef, slot: u16, count: u16 },
    Unmapped,
}

#[derive(Debug, Clone)]
struct CapEntry {
    ty: ObjType,
    base: u64,
    bytes: u64,
    parent: Option<CapRef>,
    object: Object,
}

impl CapEntry {
    const fn overlaps(&self, base: u64, bytes: u64) -> bool {
        self.base < base + bytes && base < self.base + self.bytes
    }
}

/// In-memory capability kernel.
#[derive(Debug, Default)]
pub struct SimKernel {
    cnodes: BTreeMap<CNodeRef, u32>,
    caps: BTreeMap<CapRef, CapEntry>,
    next_cnode: u32,
    fail: Option<(SimOp, usize)>,
}

impl SimKernel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty `CNode` with `slots` slots out of thin air.
    pub fn create_cnode(&mut self, slots: u32) -> CNodeRef {
        self.next_cnode += 1;
        let cnode = CNodeRef::new(self.next_cnode);
        self.cnodes.insert(cnode, slots);
        cnode
    }

    /// Places a root RAM capability for `[base, base + bytes)` in `dest`, the
    /// way the kernel hands out boot memory.
    ///
    /// # Errors
    /// Fails when `dest` does not exist or is occupied.
    pub fn mint_ram(&mut self, dest: CapRef, base: u64, bytes: u64) -> Result<(), CapError> {
        self.check_empty(dest)?;
        self.caps.insert(
            dest,
            CapEntry {
                ty: ObjType::Ram,
                base,
                bytes,
                parent: None,
                object: Object::Memory,
            },
        );
        Ok(())
    }

    /// Lets the next `n` calls of `op` succeed and fails the one after.
    pub const fn fail_after(&mut self, op: SimOp, n: usize) {
        self.fail = Some((op, n));
    }

    #[must_use]
    pub fn contains(&self, cap: CapRef) -> bool {
        self.caps.contains_key(&cap)
    }

    #[must_use]
    pub fn cap_type(&self, cap: CapRef) -> Option<ObjType> {
        self.caps.get(&cap).map(|e| e.ty)
    }

    /// Number of occupied slots across all `CNode`s.
    #[must_use]
    pub fn live_caps(&self) -> usize {
        self.caps.len()
    }

    /// Number of live capabilities of type `ty`.
    #[must_use]
    pub fn count_of(&self, ty: ObjType) -> usize {
        self.caps.values().filter(|e| e.ty == ty).count()
    }

    /// Number of direct descendants of `cap`.
    #[must_use]
    pub fn children(&self, cap: CapRef) -> usize {
        self.caps
            .values()
            .filter(|e| e.parent == Some(cap))
            .count()
    }

    #[must_use]
    pub fn cnode_count(&self) -> usize {
        self.cnodes.len()
    }

    /// Number of installed entries in the page table in `table`.
    #[must_use]
    pub fn mapped_entries(&self, table: CapRef) -> usize {
        match self.caps.get(&table).map(|e| &e.object) {
            Some(Object::VNode(entries)) => entries.len(),
            _ => 0,
        }
    }

    /// Walks the two-level tables rooted at `root` for `vaddr`.
    #[must_use]
    pub fn translate(&self, root: CapRef, vaddr: u32) -> Option<Translation> {
        let l1 = u16::try_from(vaddr >> 20).ok()?;
        let l2 = u16::try_from((vaddr >> 12) & 0xFF).ok()?;
        let Object::VNode(l1_entries) = &self.caps.get(&root)?.object else {
            return None;
        };
        let table = l1_entries.get(&l1)?.src;
        let Object::VNode(l2_entries) = &self.caps.get(&table)?.object else {
            return None;
        };
        let pte = l2_entries.get(&l2)?;
        let frame = self.caps.get(&pte.src)?;
        Some(Translation {
            paddr: frame.base + pte.offset + u64::from(vaddr & 0xFFF),
            flags: pte.flags,
        })
    }

    fn check_fail(&mut self, op: SimOp) -> Result<(), CapError> {
        match self.fail {
            Some((o, 0)) if o == op => {
                self.fail = None;
                Err(CapError::Refused(op.as_str()))
            }
            Some((o, n)) if o == op => {
                self.fail = Some((o, n - 1));
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn check_empty(&self, dest: CapRef) -> Result<(), CapError> {
        match self.cnodes.get(&dest.cnode) {
            Some(&slots) if dest.slot < slots => {}
            _ => return Err(CapError::InvalidSlot(dest)),
        }
        if self.caps.contains_key(&dest) {
            return Err(CapError::SlotInUse(dest));
        }
        Ok(())
    }

    fn entry(&self, cap: CapRef) -> Result<&CapEntry, CapError> {
        self.caps.get(&cap).ok_or(CapError::NullCap(cap))
    }

    /// Removes `cap` and everything that only exists through it.
    fn remove(&mut self, cap: CapRef) {
        let Some(entry) = self.caps.remove(&cap) else {
            return;
        };
        match entry.object {
            Object::CNode(cnode) => {
                self.cnodes.remove(&cnode);
                let stored: Vec<CapRef> = self
                    .caps
                    .range(CapRef::new(cnode, 0)..=CapRef::new(cnode, u32::MAX))
                    .map(|(k, _)| *k)
                    .collect();
                for c in stored {
                    self.remove(c);
                }
            }
            Object::Mapping { table, slot, count } => {
                self.clear_entries(table, slot, count);
            }
            Object::Memory | Object::VNode(_) | Object::Unmapped => {}
        }

        // Entries pointing at the deleted object go away with it.
        for e in self.caps.values_mut() {
            if let Object::VNode(entries) = &mut e.object {
                entries.retain(|_, pte| pte.src != cap);
            }
        }
    }

    fn clear_entries(&mut self, table: CapRef, slot: u16, count: u16) {
        if let Some(CapEntry {
            object: Object::VNode(entries),
            ..
        }) = self.caps.get_mut(&table)
        {
            for i in slot..slot + count {
                entries.remove(&i);
            }
        }
    }

    fn descendants(&self, root: CapRef) -> BTreeSet<CapRef> {
        let mut found = BTreeSet::new();
        let mut frontier = alloc::vec![root];
        while let Some(cur) = frontier.pop() {
            for (k, e) in &self.caps {
                if e.parent == Some(cur) && found.insert(*k) {
                    frontier.push(*k);
                }
            }
        }
        found
    }
}

impl CapOps for SimKernel {
    fn retype(
        &mut self,
        dest: CapRef,
        src: CapRef,
        offset: u64,
        ty: ObjType,
        objsize: u64,
        count: usize,
    ) -> Result<(), CapError> {
        self.check_fail(SimOp::Retype)?;
        let source = self.entry(src)?;
        if !source.ty.can_retype_into(ty) {
            return Err(CapError::InvalidRetype {
                from: source.ty,
                to: ty,
            });
        }
        if count == 0 || objsize == 0 || !objsize.is_multiple_of(BASE_PAGE_SIZE) {
            return Err(CapError::InvalidSize(objsize));
        }
        if ty == ObjType::L2CNode && objsize != OBJSIZE_L2CNODE {
            return Err(CapError::InvalidSize(objsize));
        }
        if !offset.is_multiple_of(BASE_PAGE_SIZE) {
            return Err(CapError::InvalidOffset(offset));
        }
        let total = u64::try_from(count)
            .ok()
            .and_then(|c| c.checked_mul(objsize))
            .ok_or(CapError::InvalidSize(objsize))?;
        let out_of_bounds = CapError::OutOfBounds {
            offset,
            bytes: total,
            available: source.bytes,
        };
        match offset.checked_add(total) {
            Some(end) if end <= source.bytes => {}
            _ => return Err(out_of_bounds),
        }

        let base = source.base + offset;
        let overlap = self
            .caps
            .values()
            .any(|e| e.parent == Some(src) && e.overlaps(base, total));
        if overlap {
            return Err(CapError::RetypeOverlap);
        }

        let count = u32::try_from(count).map_err(|_| CapError::InvalidSize(objsize))?;
        for i in 0..count {
            self.check_empty(dest.offset(i))?;
        }

        for (i, obj_base) in (0..count).zip((0u64..).map(|n| base + n * objsize)) {
            let object = if ty == ObjType::L2CNode {
                Object::CNode(self.create_cnode(L2_CNODE_SLOTS))
            } else if ty.is_vnode() {
                Object::VNode(BTreeMap::new())
            } else {
                Object::Memory
            };
            self.caps.insert(
                dest.offset(i),
                CapEntry {
                    ty,
                    base: obj_base,
                    bytes: objsize,
                    parent: Some(src),
                    object,
                },
            );
        }
        log::trace!("sim: retype {src} +{offset:#x} -> {count}x {ty:?} of {objsize:#x} at {dest}");
        Ok(())
    }

    fn destroy(&mut self, cap: CapRef) -> Result<(), CapError> {
        self.check_fail(SimOp::Destroy)?;
        self.entry(cap)?;
        self.remove(cap);
        Ok(())
    }

    fn revoke(&mut self, cap: CapRef) -> Result<(), CapError> {
        self.check_fail(SimOp::Revoke)?;
        self.entry(cap)?;
        for d in self.descendants(cap) {
            self.remove(d);
        }
        Ok(())
    }

    fn identify(&self, cap: CapRef) -> Result<FrameIdentity, CapError> {
        let e = self.entry(cap)?;
        if !e.ty.is_memory() {
            return Err(CapError::WrongType {
                expected: ObjType::Ram,
                found: e.ty,
            });
        }
        Ok(FrameIdentity {
            base: e.base,
            bytes: e.bytes,
        })
    }

    fn cnode_ref(&self, cap: CapRef) -> Result<CNodeRef, CapError> {
        let e = self.entry(cap)?;
        match e.object {
            Object::CNode(cnode) => Ok(cnode),
            _ => Err(CapError::WrongType {
                expected: ObjType::L2CNode,
                found: e.ty,
            }),
        }
    }
}

impl VnodeOps for SimKernel {
    fn vnode_create(&mut self, dest: CapRef, ty: ObjType) -> Result<(), CapError> {
        self.check_fail(SimOp::VnodeCreate)?;
        if !ty.is_vnode() {
            return Err(CapError::InvalidRetype {
                from: ObjType::Ram,
                to: ty,
            });
        }
        self.check_empty(dest)?;
        self.caps.insert(
            dest,
            CapEntry {
                ty,
                base: 0,
                bytes: 0,
                parent: None,
                object: Object::VNode(BTreeMap::new()),
            },
        );
        Ok(())
    }

    fn vnode_map(
        &mut self,
        table: CapRef,
        src: CapRef,
        mapping: CapRef,
        range: MapRange,
    ) -> Result<(), CapError> {
        self.check_fail(SimOp::VnodeMap)?;
        let t = self.entry(table)?;
        let (capacity, expected) = match t.ty {
            ObjType::VNodeArmL1 => (L1_PAGETABLE_ENTRIES, ObjType::VNodeArmL2),
            ObjType::VNodeArmL2 => (L2_PAGETABLE_ENTRIES, ObjType::Frame),
            found => {
                return Err(CapError::WrongType {
                    expected: ObjType::VNodeArmL2,
                    found,
                });
            }
        };
        if range.pte_count == 0 || usize::from(range.slot) + usize::from(range.pte_count) > capacity
        {
            return Err(CapError::VnodeSlotRange(range.slot));
        }
        let Object::VNode(entries) = &t.object else {
            return Err(CapError::NotMapped);
        };
        if let Some(used) = (range.slot..range.slot + range.pte_count).find(|i| entries.contains_key(i)) {
            return Err(CapError::VnodeSlotInUse(used));
        }

        let s = self.entry(src)?;
        let type_ok = match expected {
            ObjType::Frame => matches!(s.ty, ObjType::Frame | ObjType::DevFrame),
            other => s.ty == other,
        };
        if !type_ok {
            return Err(CapError::WrongType { expected, found: s.ty });
        }
        if s.ty.is_memory() {
            if !range.offset.is_multiple_of(BASE_PAGE_SIZE) {
                return Err(CapError::InvalidOffset(range.offset));
            }
            let bytes = u64::from(range.pte_count) * BASE_PAGE_SIZE;
            if range.offset + bytes > s.bytes {
                return Err(CapError::OutOfBounds {
                    offset: range.offset,
                    bytes,
                    available: s.bytes,
                });
            }
        }
        self.check_empty(mapping)?;

        if let Some(CapEntry {
            object: Object::VNode(entries),
            ..
        }) = self.caps.get_mut(&table)
        {
            for (i, slot) in (range.slot..range.slot + range.pte_count).enumerate() {
                entries.insert(
                    slot,
                    Pte {
                        src,
                        offset: range.offset + i as u64 * BASE_PAGE_SIZE,
                        flags: range.flags,
                    },
                );
            }
        }
        self.caps.insert(
            mapping,
            CapEntry {
                ty: ObjType::Mapping,
                base: 0,
                bytes: 0,
                parent: None,
                object: Object::Mapping {
                    table,
                    slot: range.slot,
                    count: range.pte_count,
                },
            },
        );
        Ok(())
    }

    fn vnode_unmap(&mut self, table: CapRef, mapping: CapRef) -> Result<(), CapError> {
        self.check_fail(SimOp::VnodeUnmap)?;
        let m = self.entry(mapping)?;
        let Object::Mapping {
            table: installed,
            slot,
            count,
        } = m.object
        else {
            return Err(CapError::NotMapped);
        };
        if installed != table {
            return Err(CapError::NotMapped);
        }
        self.clear_entries(table, slot, count);
        if let Some(m) = self.caps.get_mut(&mapping) {
            m.object = Object::Unmapped;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (SimKernel, CNodeRef, CapRef) {
        let mut k = SimKernel::new();
        let cn = k.create_cnode(64);
        let ram = CapRef::new(cn, 0);
        k.mint_ram(ram, 0x10_0000, 0x10_0000).unwrap();
        (k, cn, ram)
    }

    #[test]
    fn retype_respects_bounds_and_overlap() {
        let (mut k, cn, ram) = setup();
        k.retype(CapRef::new(cn, 1), ram, 0x1000, ObjType::Ram, 0x2000, 1)
            .unwrap();
        assert_eq!(
            k.identify(CapRef::new(cn, 1)).unwrap(),
            FrameIdentity {
                base: 0x10_1000,
                bytes: 0x2000
            }
        );

        let err = k.retype(CapRef::new(cn, 2), ram, 0x2000, ObjType::Ram, 0x1000, 1);
        assert_eq!(err, Err(CapError::RetypeOverlap));

        let err = k.retype(CapRef::new(cn, 2), ram, 0xF_F000, ObjType::Ram, 0x2000, 1);
        assert!(matches!(err, Err(CapError::OutOfBounds { .. })));

        let err = k.retype(CapRef::new(cn, 1), ram, 0x8000, ObjType::Ram, 0x1000, 1);
        assert_eq!(err, Err(CapError::SlotInUse(CapRef::new(cn, 1))));
    }

    #[test]
    fn destroy_allows_retyping_the_range_again() {
        let (mut k, cn, ram) = setup();
        let a = CapRef::new(cn, 1);
        k.retype(a, ram, 0, ObjType::Frame, 0x1000, 1).unwrap();
        k.destroy(a).unwrap();
        assert!(!k.contains(a));
        k.retype(a, ram, 0, ObjType::Frame, 0x1000, 1).unwrap();
    }

    #[test]
    fn revoke_removes_all_descendants() {
        let (mut k, cn, ram) = setup();
        let a = CapRef::new(cn, 1);
        let b = CapRef::new(cn, 2);
        k.retype(a, ram, 0, ObjType::Ram, 0x4000, 1).unwrap();
        k.retype(b, a, 0, ObjType::Frame, 0x1000, 1).unwrap();
        k.revoke(ram).unwrap();
        assert!(k.contains(ram));
        assert!(!k.contains(a));
        assert!(!k.contains(b));
    }

    #[test]
    fn l2cnode_retype_registers_a_cnode() {
        let (mut k, cn, ram) = setup();
        let c = CapRef::new(cn, 3);
        k.retype(c, ram, 0, ObjType::L2CNode, OBJSIZE_L2CNODE, 1)
            .unwrap();
        let fresh = k.cnode_ref(c).unwrap();
        k.mint_ram(CapRef::new(fresh, 255), 0, 0x1000).unwrap();
        assert_eq!(
            k.mint_ram(CapRef::new(fresh, 256), 0, 0x1000),
            Err(CapError::InvalidSlot(CapRef::new(fresh, 256)))
        );
    }

    #[test]
    fn map_and_translate() {
        let (mut k, cn, ram) = setup();
        let root = CapRef::new(cn, 10);
        let l2 = CapRef::new(cn, 11);
        let link = CapRef::new(cn, 12);
        let frame = CapRef::new(cn, 13);
        let mapping = CapRef::new(cn, 14);
        k.vnode_create(root, ObjType::VNodeArmL1).unwrap();
        k.vnode_create(l2, ObjType::VNodeArmL2).unwrap();
        k.vnode_map(root, l2, link, MapRange::single(0x400, VregionFlags::READ_WRITE))
            .unwrap();
        k.retype(frame, ram, 0x3000, ObjType::Frame, 0x1000, 1)
            .unwrap();
        k.vnode_map(l2, frame, mapping, MapRange::single(5, VregionFlags::READ))
            .unwrap();

        let t = k.translate(root, 0x4000_5123).unwrap();
        assert_eq!(t.paddr, 0x10_3123);
        assert_eq!(t.flags, VregionFlags::READ);
        assert_eq!(k.translate(root, 0x4000_6000), None);

        let err = k.vnode_map(l2, frame, CapRef::new(cn, 15), MapRange::single(5, VregionFlags::READ));
        assert_eq!(err, Err(CapError::VnodeSlotInUse(5)));

        k.vnode_unmap(l2, mapping).unwrap();
        assert_eq!(k.translate(root, 0x4000_5000), None);
        k.destroy(mapping).unwrap();
    }

    #[test]
    fn injected_failures_fire_once() {
        let (mut k, cn, ram) = setup();
        k.fail_after(SimOp::Retype, 1);
        k.retype(CapRef::new(cn, 1), ram, 0, ObjType::Frame, 0x1000, 1)
            .unwrap();
        assert_eq!(
            k.retype(CapRef::new(cn, 2), ram, 0x1000, ObjType::Frame, 0x1000, 1),
            Err(CapError::Refused("retype"))
        );
        k.retype(CapRef::new(cn, 2), ram, 0x1000, ObjType::Frame, 0x1000, 1)
            .unwrap();
    }
}
