//! Address-ordered region chains over a slab of nodes.
//!
//! Two chains share one pool: the region chain holds every Free and
//! Allocated range, the parent chain holds one node per donated capability.
//! Within a Parent, its Free and Allocated nodes tile the range without gaps.

use crate::MmError;
use crate::node::{MmNode, NodeKind};
use aos_addresses::PhysicalAddress;
use aos_caps::{CapOps, CapRef, ObjType};
use aos_slab::{SlabKey, SlabPool};

#[derive(Debug, Default)]
pub struct RegionList {
    pub nodes: SlabPool<MmNode>,
    head: Option<SlabKey>,
    parents: Option<SlabKey>,
}

/// Walks one chain front to back.
pub struct Chain<'a> {
    nodes: &'a SlabPool<MmNode>,
    cur: Option<SlabKey>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = (SlabKey, &'a MmNode);

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.cur?;
        let node = &self.nodes[key];
        self.cur = node.next;
        Some((key, node))
    }
}

impl RegionList {
    pub const fn new() -> Self {
        Self {
            nodes: SlabPool::new(),
            head: None,
            parents: None,
        }
    }

    pub const fn regions(&self) -> Chain<'_> {
        Chain {
            nodes: &self.nodes,
            cur: self.head,
        }
    }

    pub const fn parents(&self) -> Chain<'_> {
        Chain {
            nodes: &self.nodes,
            cur: self.parents,
        }
    }

    fn head_of(&mut self, key: SlabKey) -> &mut Option<SlabKey> {
        if matches!(self.nodes[key].kind, NodeKind::Parent { .. }) {
            &mut self.parents
        } else {
            &mut self.head
        }
    }

    fn link_before(&mut self, at: SlabKey, key: SlabKey) {
        let prev = self.nodes[at].prev;
        let node = &mut self.nodes[key];
        node.prev = prev;
        node.next = Some(at);
        self.nodes[at].prev = Some(key);
        match prev {
            Some(p) => self.nodes[p].next = Some(key),
            None => *self.head_of(key) = Some(key),
        }
    }

    fn link_after(&mut self, at: SlabKey, key: SlabKey) {
        let next = self.nodes[at].next;
        let node = &mut self.nodes[key];
        node.prev = Some(at);
        node.next = next;
        self.nodes[at].next = Some(key);
        if let Some(n) = next {
            self.nodes[n].prev = Some(key);
        }
    }

    fn unlink(&mut self, key: SlabKey) {
        let (prev, next) = (self.nodes[key].prev, self.nodes[key].next);
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => *self.head_of(key) = next,
        }
        if let Some(n) = next {
            self.nodes[n].prev = prev;
        }
        let node = &mut self.nodes[key];
        node.prev = None;
        node.next = None;
    }

    /// Links `key` into its chain in address order.
    pub fn insert_sorted(&mut self, key: SlabKey) {
        let base = self.nodes[key].base;
        let mut cur = *self.head_of(key);
        let mut last = None;
        while let Some(c) = cur {
            if self.nodes[c].base > base {
                self.link_before(c, key);
                return;
            }
            last = Some(c);
            cur = self.nodes[c].next;
        }
        match last {
            Some(l) => self.link_after(l, key),
            None => *self.head_of(key) = Some(key),
        }
    }

    pub fn overlaps_parent(&self, base: PhysicalAddress, size: u64) -> bool {
        let end = base.as_u64() + size;
        self.parents()
            .any(|(_, p)| p.base.as_u64() < end && base.as_u64() < p.end())
    }

    /// Finds the Allocated node covering exactly `[base, base + size)`.
    pub fn find_allocated(&self, base: PhysicalAddress, size: u64) -> Option<SlabKey> {
        self.regions()
            .take_while(|(_, n)| n.base <= base)
            .find(|(_, n)| {
                n.base == base && n.size == size && matches!(n.kind, NodeKind::Allocated { .. })
            })
            .map(|(k, _)| k)
    }

    /// First Free node able to hold `size` bytes at an `alignment` boundary,
    /// together with that boundary.
    fn first_fit(&self, size: u64, alignment: u64) -> Option<(SlabKey, PhysicalAddress)> {
        self.regions()
            .filter(|(_, n)| matches!(n.kind, NodeKind::Free { .. }))
            .find_map(|(k, n)| {
                let aligned = n.base.as_u64().checked_next_multiple_of(alignment)?;
                let end = aligned.checked_add(size)?;
                (end <= n.end()).then_some((k, PhysicalAddress::new(aligned)))
            })
    }

    fn parent_cap(&self, parent: SlabKey) -> (CapRef, PhysicalAddress) {
        match self.nodes[parent].kind {
            NodeKind::Parent { cap } => (cap, self.nodes[parent].base),
            other => panic!("region provenance points at a {other:?} node"),
        }
    }

    fn take_spares(&mut self) -> Result<[SlabKey; 2], MmError> {
        let a = self.nodes.alloc(MmNode::spare()).ok_or(MmError::OutOfNodes)?;
        let Some(b) = self.nodes.alloc(MmNode::spare()) else {
            self.nodes.free(a);
            return Err(MmError::OutOfNodes);
        };
        Ok([a, b])
    }

    /// Finds, mints and splits off an aligned range in one step.
    ///
    /// The two nodes a split may need are taken before the scan, and the
    /// capability is minted before the list changes, so every failure leaves
    /// the chains as they were.
    pub fn carve<K: CapOps + ?Sized>(
        &mut self,
        kernel: &mut K,
        dest: CapRef,
        size: u64,
        alignment: u64,
        objtype: ObjType,
    ) -> Result<SlabKey, MmError> {
        let spares = self.take_spares()?;
        let release = |list: &mut Self| {
            for s in spares {
                if matches!(list.nodes.get(s), Some(n) if n.kind == NodeKind::Spare) {
                    list.nodes.free(s);
                }
            }
        };

        let Some((key, aligned)) = self.first_fit(size, alignment) else {
            release(self);
            return Err(MmError::OutOfMemory { size, alignment });
        };
        let parent = self.nodes[key]
            .parent()
            .expect("free node without provenance");
        let (parent_cap, parent_base) = self.parent_cap(parent);

        if let Err(e) = kernel.retype(
            dest,
            parent_cap,
            aligned.offset_from(parent_base),
            objtype,
            size,
            1,
        ) {
            release(self);
            return Err(e.into());
        }

        let [left, right] = spares;
        let (base, end) = (self.nodes[key].base, self.nodes[key].end());
        if aligned > base {
            self.nodes[left] = MmNode::new(base, aligned.offset_from(base), NodeKind::Free { parent });
            self.link_before(key, left);
        }
        let alloc_end = aligned.as_u64() + size;
        if alloc_end < end {
            self.nodes[right] = MmNode::new(
                PhysicalAddress::new(alloc_end),
                end - alloc_end,
                NodeKind::Free { parent },
            );
            self.link_after(key, right);
        }
        let node = &mut self.nodes[key];
        node.base = aligned;
        node.size = size;
        node.kind = NodeKind::Allocated { parent, cap: dest };

        release(self);
        Ok(key)
    }

    /// Destroys the capability of an Allocated node and returns its range to
    /// the Free pool, merging with neighbours of the same provenance.
    pub fn release<K: CapOps + ?Sized>(&mut self, kernel: &mut K, key: SlabKey) -> Result<(), MmError> {
        let NodeKind::Allocated { parent, cap } = self.nodes[key].kind else {
            let n = &self.nodes[key];
            return Err(MmError::InvalidRegion {
                base: n.base,
                size: n.size,
            });
        };
        kernel.destroy(cap)?;

        self.nodes[key].kind = NodeKind::Free { parent };
        let mut key = key;
        if let Some(prev) = self.nodes[key].prev
            && self.mergeable(prev, key, parent)
        {
            self.nodes[prev].size += self.nodes[key].size;
            self.unlink(key);
            self.nodes.free(key);
            key = prev;
        }
        if let Some(next) = self.nodes[key].next
            && self.mergeable(key, next, parent)
        {
            self.nodes[key].size += self.nodes[next].size;
            self.unlink(next);
            self.nodes.free(next);
        }
        Ok(())
    }

    /// Whether adjacent `left` and `right` are both Free and share `parent`.
    fn mergeable(&self, left: SlabKey, right: SlabKey, parent: SlabKey) -> bool {
        let (l, r) = (&self.nodes[left], &self.nodes[right]);
        l.kind == NodeKind::Free { parent } && r.kind == NodeKind::Free { parent } && l.end() == r.base.as_u64()
    }
}
