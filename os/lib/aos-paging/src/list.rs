use crate::PagingError;
use crate::node::{VKind, VNode};
use aos_addresses::VirtualAddress;
use aos_slab::{SlabKey, SlabPool};

/// Address-ordered ranges tiling the managed part of the address space.
///
/// Unlike the physical list there are no gaps: every byte between the start
/// address and the top of the address space is in exactly one node.
#[derive(Debug, Default)]
pub(crate) struct VRegionList {
    pub nodes: SlabPool<VNode>,
    head: Option<SlabKey>,
}

pub(crate) struct Iter<'a> {
    list: &'a VRegionList,
    cursor: Option<SlabKey>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (SlabKey, &'a VNode);

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.cursor?;
        let node = &self.list.nodes[key];
        self.cursor = node.next;
        Some((key, node))
    }
}

impl VRegionList {
    pub const fn new() -> Self {
        Self {
            nodes: SlabPool::new(),
            head: None,
        }
    }

    pub const fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    /// Places the first node of an empty list.
    pub fn seed(&mut self, node: VNode) -> Result<SlabKey, PagingError> {
        debug_assert!(self.head.is_none());
        let key = self.nodes.alloc(node).ok_or(PagingError::OutOfNodes)?;
        self.head = Some(key);
        Ok(key)
    }

    /// The node covering `vaddr`.
    pub fn containing(&self, vaddr: VirtualAddress) -> Option<SlabKey> {
        self.iter()
            .take_while(|(_, n)| n.base <= vaddr)
            .find(|(_, n)| n.contains(vaddr, 1))
            .map(|(k, _)| k)
    }

    /// Cuts `[base, base + size)` out of node `key` and gives it `kind`.
    ///
    /// The remainders keep the node's previous kind. Both remainder nodes
    /// are allocated before anything is relinked.
    pub fn split(
        &mut self,
        key: SlabKey,
        base: VirtualAddress,
        size: u32,
        kind: VKind,
    ) -> Result<SlabKey, PagingError> {
        let node = &self.nodes[key];
        debug_assert!(node.contains(base, size));
        let (node_base, node_size, rest) = (node.base, node.size, node.kind.clone());
        let node_end = node.end();

        let left = if base > node_base {
            let n = VNode::new(node_base, base.offset_from(node_base), rest.clone());
            Some(self.nodes.alloc(n).ok_or(PagingError::OutOfNodes)?)
        } else {
            None
        };
        let right = if base.as_u64() + u64::from(size) < node_end {
            let right_base = base + size;
            let n = VNode::new(right_base, node_size - right_base.offset_from(node_base), rest);
            match self.nodes.alloc(n) {
                Some(k) => Some(k),
                None => {
                    if let Some(l) = left {
                        self.nodes.free(l);
                    }
                    return Err(PagingError::OutOfNodes);
                }
            }
        } else {
            None
        };

        if let Some(l) = left {
            self.link_before(key, l);
        }
        if let Some(r) = right {
            self.link_after(key, r);
        }
        let node = &mut self.nodes[key];
        node.base = base;
        node.size = size;
        node.kind = kind;
        Ok(key)
    }

    /// Turns node `key` into the vacant `kind` and merges it with equal
    /// neighbours. Returns the surviving node.
    pub fn settle(&mut self, key: SlabKey, kind: VKind) -> SlabKey {
        debug_assert!(kind.is_vacant());
        self.nodes[key].kind = kind;
        let mut key = key;
        if let Some(prev) = self.nodes[key].prev
            && self.mergeable(prev, key)
        {
            self.absorb(prev, key);
            key = prev;
        }
        if let Some(next) = self.nodes[key].next
            && self.mergeable(key, next)
        {
            self.absorb(key, next);
        }
        key
    }

    fn mergeable(&self, left: SlabKey, right: SlabKey) -> bool {
        let (l, r) = (&self.nodes[left], &self.nodes[right]);
        l.kind.is_vacant() && l.kind == r.kind && l.end() == r.base.as_u64()
    }

    /// Extends `left` over `right` and drops `right`.
    fn absorb(&mut self, left: SlabKey, right: SlabKey) {
        let size = self.nodes[right].size;
        self.nodes[left].size += size;
        self.unlink(right);
        self.nodes.free(right);
    }

    fn link_before(&mut self, at: SlabKey, new: SlabKey) {
        let prev = self.nodes[at].prev;
        self.nodes[new].prev = prev;
        self.nodes[new].next = Some(at);
        self.nodes[at].prev = Some(new);
        match prev {
            Some(p) => self.nodes[p].next = Some(new),
            None => self.head = Some(new),
        }
    }

    fn link_after(&mut self, at: SlabKey, new: SlabKey) {
        let next = self.nodes[at].next;
        self.nodes[new].next = next;
        self.nodes[new].prev = Some(at);
        self.nodes[at].next = Some(new);
        if let Some(n) = next {
            self.nodes[n].prev = Some(new);
        }
    }

    fn unlink(&mut self, key: SlabKey) {
        let (prev, next) = (self.nodes[key].prev, self.nodes[key].next);
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        if let Some(n) = next {
            self.nodes[n].prev = prev;
        }
        let node = &mut self.nodes[key];
        node.prev = None;
        node.next = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::RegionId;

    fn list(base: u32, size: u32) -> VRegionList {
        let mut list = VRegionList::new();
        list.nodes.grow_blocks(8);
        list.seed(VNode::new(VirtualAddress::new(base), size, VKind::Free))
            .unwrap();
        list
    }

    fn spans(list: &VRegionList) -> Vec<(u32, u32)> {
        list.iter().map(|(_, n)| (n.base.as_u32(), n.size)).collect()
    }

    #[test]
    fn split_and_settle_restore_one_node() {
        let mut l = list(0x1000, 0x8000);
        let key = l.containing(VirtualAddress::new(0x3000)).unwrap();
        let reserved = VKind::Reserved {
            region: RegionId(1),
        };
        let mid = l
            .split(key, VirtualAddress::new(0x3000), 0x2000, reserved.clone())
            .unwrap();
        assert_eq!(spans(&l), vec![(0x1000, 0x2000), (0x3000, 0x2000), (0x5000, 0x4000)]);

        // Different vacant kinds do not merge.
        assert_eq!(l.settle(mid, reserved), mid);
        assert_eq!(spans(&l).len(), 3);

        l.settle(mid, VKind::Free);
        assert_eq!(spans(&l), vec![(0x1000, 0x8000)]);
        assert_eq!(l.nodes.len(), 1);
    }

    #[test]
    fn split_up_to_the_top_of_the_address_space() {
        let mut l = list(0xFFFF_0000, 0xFFFF);
        let key = l.containing(VirtualAddress::new(0xFFFF_E000)).unwrap();
        l.split(key, VirtualAddress::new(0xFFFF_E000), 0x1000, VKind::Free)
            .unwrap();
        assert_eq!(
            spans(&l),
            vec![(0xFFFF_0000, 0xE000), (0xFFFF_E000, 0x1000), (0xFFFF_F000, 0xFFF)]
        );
        assert!(l.containing(VirtualAddress::new(0xFFFF_FFFF)).is_none());
    }

    #[test]
    fn failed_split_leaves_the_list_alone() {
        let mut l = VRegionList::new();
        l.nodes.grow_blocks(2);
        let key = l
            .seed(VNode::new(VirtualAddress::new(0), 0x4000, VKind::Free))
            .unwrap();
        let err = l.split(key, VirtualAddress::new(0x1000), 0x1000, VKind::Free);
        assert_eq!(err, Err(PagingError::OutOfNodes));
        assert_eq!(spans(&l), vec![(0, 0x4000)]);
        assert_eq!(l.nodes.free_count(), 1);
    }
}
