use aos_addresses::VirtualAddress;
use aos_caps::sim::{SimKernel, SimOp};
use aos_caps::{CNodeRef, CapError, CapOps, CapRef, ObjType, VnodeOps, VregionFlags};
use aos_info::memory::{VADDR_LIMIT, VADDR_OFFSET};
use aos_paging::{PagingError, PagingState, VRegionState};
use aos_slot::{SingleSlotAllocator, SlotAllocator};
use std::collections::BTreeSet;

const PAGE: u32 = 0x1000;
const V: u32 = VADDR_OFFSET;

struct World {
    kernel: SimKernel,
    paging: PagingState<SingleSlotAllocator>,
    scratch: CNodeRef,
    next_scratch: u32,
}

impl World {
    fn new() -> Self {
        let mut kernel = SimKernel::new();
        let scratch = kernel.create_cnode(64);
        let root = CapRef::new(scratch, 0);
        kernel.vnode_create(root, ObjType::VNodeArmL1).unwrap();
        let slots = kernel.create_cnode(4096);
        let paging = PagingState::new(VirtualAddress::new(V), root, SingleSlotAllocator::new(slots, 4096)).unwrap();
        Self {
            kernel,
            paging,
            scratch,
            next_scratch: 1,
        }
    }

    /// A frame capability over `[paddr, paddr + bytes)`.
    fn frame(&mut self, paddr: u64, bytes: u64) -> CapRef {
        let ram = CapRef::new(self.scratch, self.next_scratch);
        let frame = ram.offset(1);
        self.next_scratch += 2;
        self.kernel.mint_ram(ram, paddr, bytes).unwrap();
        self.kernel
            .retype(frame, ram, 0, ObjType::Frame, bytes, 1)
            .unwrap();
        frame
    }

    fn layout(&self) -> Vec<(u32, u32, VRegionState)> {
        self.paging
            .regions()
            .map(|r| (r.base.as_u32(), r.size, r.state))
            .collect()
    }
}

#[test]
fn map_must_fit_one_free_range() {
    let mut w = World::new();
    let blocker = w.frame(0x8000_0000, 0x1000);
    w.paging
        .map_fixed_attr(&mut w.kernel, VirtualAddress::new(V + PAGE), blocker, PAGE, VregionFlags::READ_WRITE)
        .unwrap();
    let before = w.layout();
    let caps = w.kernel.live_caps();
    let tables = w.paging.l2_table_count();

    // [V, V + 0x1000) is Free, the page after it is not.
    let frame = w.frame(0x8010_0000, 0x2000);
    let err = w
        .paging
        .map_fixed_attr(&mut w.kernel, VirtualAddress::new(V), frame, 0x2000, VregionFlags::READ_WRITE)
        .unwrap_err();
    assert_eq!(
        err,
        PagingError::RegionMapFailed {
            vaddr: VirtualAddress::new(V),
            bytes: 0x2000
        }
    );
    assert_eq!(w.layout(), before);
    assert_eq!(w.kernel.live_caps(), caps);
    assert_eq!(w.paging.l2_table_count(), tables);
}

#[test]
fn fixed_mapping_splits_and_translates() {
    let mut w = World::new();
    let frame = w.frame(0x8000_0000, 0x3000);
    let vaddr = VirtualAddress::new(V + 0x5000);
    w.paging
        .map_fixed_attr(&mut w.kernel, vaddr, frame, 0x3000, VregionFlags::READ_WRITE)
        .unwrap();

    let layout = w.layout();
    assert_eq!(layout[0], (V, 0x5000, VRegionState::Free));
    assert_eq!(layout[1], (V + 0x5000, 0x3000, VRegionState::Mapped));
    assert_eq!(layout[2].0, V + 0x8000);
    assert_eq!(layout.len(), 3);
    assert_eq!(w.paging.regions().nth(1).map(|r| r.pages), Some(3));

    let root = w.paging.root();
    let t = w.kernel.translate(root, V + 0x6234).unwrap();
    assert_eq!(t.paddr, 0x8000_1234);
    assert_eq!(t.flags, VregionFlags::READ_WRITE);
    assert!(w.kernel.translate(root, V + 0x8000).is_none());

    assert!(w.paging.is_l2_initialized((V >> 20) as usize));
    assert!(!w.paging.is_l2_initialized((V >> 20) as usize + 1));
    assert_eq!(w.paging.l2_table_count(), 1);
}

#[test]
fn second_level_tables_are_created_per_megabyte() {
    let mut w = World::new();
    let frame = w.frame(0x8000_0000, 0x2000);
    let vaddr = VirtualAddress::new(V + 0x10_0000 - PAGE);
    w.paging
        .map_fixed_attr(&mut w.kernel, vaddr, frame, 0x2000, VregionFlags::READ)
        .unwrap();

    assert_eq!(w.paging.l2_table_count(), 2);
    assert_eq!(w.kernel.count_of(ObjType::VNodeArmL2), 2);
    let root = w.paging.root();
    assert_eq!(w.kernel.translate(root, V + 0x10_0000 - PAGE).unwrap().paddr, 0x8000_0000);
    assert_eq!(w.kernel.translate(root, V + 0x10_0000).unwrap().paddr, 0x8000_1000);

    // A second mapping in the same megabyte reuses the table.
    let other = w.frame(0x8100_0000, 0x1000);
    w.paging
        .map_fixed_attr(&mut w.kernel, VirtualAddress::new(V + 0x10_1000), other, PAGE, VregionFlags::READ)
        .unwrap();
    assert_eq!(w.paging.l2_table_count(), 2);
}

#[test]
fn unmap_returns_range_tables_and_slots() {
    let mut w = World::new();
    let slots = w.paging.slots().space();
    let initial = w.layout();
    let frame = w.frame(0x8000_0000, 0x4000);
    let vaddr = VirtualAddress::new(V + 0x2000);
    w.paging
        .map_fixed_attr(&mut w.kernel, vaddr, frame, 0x4000, VregionFlags::READ_WRITE)
        .unwrap();
    assert_eq!(w.kernel.children(frame), 4);

    w.paging.unmap(&mut w.kernel, vaddr).unwrap();
    assert_eq!(w.layout(), initial);
    assert_eq!(w.paging.l2_table_count(), 0);
    assert_eq!(w.kernel.count_of(ObjType::VNodeArmL2), 0);
    assert_eq!(w.kernel.children(frame), 0);
    assert!(w.kernel.contains(frame));
    assert!(w.kernel.translate(w.paging.root(), V + 0x2000).is_none());
    assert_eq!(w.paging.slots().space(), slots);

    // The same frame can be mapped again.
    w.paging
        .map_fixed_attr(&mut w.kernel, vaddr, frame, 0x4000, VregionFlags::READ_WRITE)
        .unwrap();
}

#[test]
fn unmap_merges_with_both_neighbours() {
    let mut w = World::new();
    let a = w.frame(0x8000_0000, 0x1000);
    let b = w.frame(0x8001_0000, 0x1000);
    let c = w.frame(0x8002_0000, 0x1000);
    let initial = w.layout();
    let va = w.paging.map_frame_attr(&mut w.kernel, a, PAGE, VregionFlags::READ).unwrap();
    let vb = w.paging.map_frame_attr(&mut w.kernel, b, PAGE, VregionFlags::READ).unwrap();
    let vc = w.paging.map_frame_attr(&mut w.kernel, c, PAGE, VregionFlags::READ).unwrap();
    assert_eq!((va.as_u32(), vb.as_u32(), vc.as_u32()), (V, V + PAGE, V + 2 * PAGE));

    w.paging.unmap(&mut w.kernel, va).unwrap();
    w.paging.unmap(&mut w.kernel, vc).unwrap();
    assert_eq!(w.layout().len(), 3);
    w.paging.unmap(&mut w.kernel, vb).unwrap();
    assert_eq!(w.layout(), initial);
}

#[test]
fn unmap_needs_the_start_of_a_mapping() {
    let mut w = World::new();
    let frame = w.frame(0x8000_0000, 0x2000);
    let vaddr = w
        .paging
        .map_frame_attr(&mut w.kernel, frame, 0x2000, VregionFlags::READ)
        .unwrap();

    assert_eq!(
        w.paging.unmap(&mut w.kernel, vaddr + PAGE),
        Err(PagingError::InvalidRegion)
    );
    assert_eq!(
        w.paging.unmap(&mut w.kernel, VirtualAddress::new(0x9000_0000)),
        Err(PagingError::InvalidRegion)
    );
    assert_eq!(w.kernel.children(frame), 2);
}

#[test]
fn failed_page_mapping_is_unwound() {
    let mut w = World::new();
    let frame = w.frame(0x8000_0000, 0x3000);
    let before = w.layout();
    let caps = w.kernel.live_caps();
    let slots = w.paging.slots().space();

    // The table link and the first page succeed, the second page fails.
    w.kernel.fail_after(SimOp::VnodeMap, 2);
    let err = w
        .paging
        .map_fixed_attr(&mut w.kernel, VirtualAddress::new(V), frame, 0x3000, VregionFlags::READ_WRITE)
        .unwrap_err();
    assert_eq!(err, PagingError::Capability(CapError::Refused("vnode_map")));

    assert_eq!(w.layout(), before);
    assert_eq!(w.paging.l2_table_count(), 0);
    assert_eq!(w.kernel.live_caps(), caps);
    assert_eq!(w.paging.slots().space(), slots);
    assert_eq!(w.kernel.children(frame), 0);
}

#[test]
fn failed_table_creation_is_unwound() {
    let mut w = World::new();
    let frame = w.frame(0x8000_0000, 0x1000);
    let before = w.layout();
    let caps = w.kernel.live_caps();

    w.kernel.fail_after(SimOp::VnodeCreate, 0);
    let err = w
        .paging
        .map_frame_attr(&mut w.kernel, frame, PAGE, VregionFlags::READ)
        .unwrap_err();
    assert!(matches!(err, PagingError::Capability(_)));
    assert_eq!(w.layout(), before);
    assert_eq!(w.kernel.live_caps(), caps);
}

#[test]
fn alloc_only_finds() {
    let mut w = World::new();
    let a = w.paging.alloc(0x2000).unwrap();
    let b = w.paging.alloc(0x2000).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.as_u32(), V);

    let aligned = w.paging.alloc_aligned(PAGE, 0x10_0000).unwrap();
    assert_eq!(aligned.as_u32(), V);
    let frame = w.frame(0x8000_0000, 0x1000);
    w.paging
        .map_fixed_attr(&mut w.kernel, a, frame, PAGE, VregionFlags::READ)
        .unwrap();
    assert_eq!(w.paging.alloc(PAGE).unwrap().as_u32(), V + PAGE);
    assert_eq!(w.paging.alloc_aligned(PAGE, 0x10_0000).unwrap().as_u32(), V + 0x10_0000);
}

#[test]
fn argument_errors() {
    let mut w = World::new();
    let frame = w.frame(0x8000_0000, 0x1000);
    assert_eq!(
        w.paging
            .map_fixed_attr(&mut w.kernel, VirtualAddress::new(V + 0x10), frame, PAGE, VregionFlags::READ),
        Err(PagingError::Unaligned(VirtualAddress::new(V + 0x10)))
    );
    assert!(matches!(
        w.paging
            .map_fixed_attr(&mut w.kernel, VirtualAddress::new(V), frame, 0, VregionFlags::READ),
        Err(PagingError::InvalidArgument(_))
    ));
    assert_eq!(w.paging.alloc(0xF000_0000), Err(PagingError::OutOfVirtualMemory));
    assert!(matches!(
        PagingState::new(VirtualAddress::new(V + 1), w.paging.root(), SingleSlotAllocator::new(CNodeRef::new(1), 1)),
        Err(PagingError::Unaligned(_))
    ));

    w.paging
        .map_fixed_attr(&mut w.kernel, VirtualAddress::new(V), frame, PAGE, VregionFlags::READ)
        .unwrap();
    let again = w.frame(0x8100_0000, 0x1000);
    assert!(matches!(
        w.paging
            .map_fixed_attr(&mut w.kernel, VirtualAddress::new(V), again, PAGE, VregionFlags::READ),
        Err(PagingError::RegionMapFailed { .. })
    ));
}

fn xorshift(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

/// The ranges cover `[V, VADDR_LIMIT)` without gaps, no two Free ranges
/// touch, and exactly the megabytes holding a mapped page have a table.
fn assert_gapless(w: &World) {
    let regions: Vec<_> = w.paging.regions().collect();
    let mut cursor = u64::from(V);
    for r in &regions {
        assert_eq!(u64::from(r.base.as_u32()), cursor, "gap before {r:?}");
        cursor += u64::from(r.size);
        if r.state == VRegionState::Mapped {
            assert_eq!(r.pages, (r.size / PAGE) as usize);
        }
    }
    assert_eq!(cursor, u64::from(VADDR_LIMIT));
    for pair in regions.windows(2) {
        assert!(
            !(pair[0].state == VRegionState::Free && pair[1].state == VRegionState::Free),
            "unmerged: {pair:?}"
        );
    }

    let megabytes: BTreeSet<u32> = regions
        .iter()
        .filter(|r| r.state == VRegionState::Mapped)
        .flat_map(|r| (r.base.as_u32() >> 20)..=((r.base.as_u32() + r.size - 1) >> 20))
        .collect();
    assert_eq!(w.paging.l2_table_count(), megabytes.len());
    for mb in megabytes {
        assert!(w.paging.is_l2_initialized(mb as usize));
    }
}

#[test]
fn random_map_unmap_keeps_the_space_gapless() {
    let mut w = World::new();
    let initial = w.layout();
    let slots = w.paging.slots().space();
    let mut frames: Vec<CapRef> = (0..24u64)
        .map(|i| w.frame(0x8000_0000 + (i << 20), 0x1_0000))
        .collect();
    let mut live: Vec<(VirtualAddress, CapRef)> = Vec::new();
    let mut rng = 0x9E37_79B9_7F4A_7C15;

    for _ in 0..1500 {
        let r = xorshift(&mut rng);
        if !frames.is_empty() && (live.is_empty() || r % 3 != 0) {
            let frame = frames.pop().unwrap();
            let bytes = PAGE * (1 + u32::try_from((r >> 8) % 16).unwrap());
            let result = if r & 0x10 == 0 {
                w.paging
                    .map_frame_attr(&mut w.kernel, frame, bytes, VregionFlags::READ_WRITE)
            } else {
                // Somewhere in the first 8 MiB, wherever that happens to fit.
                let vaddr = VirtualAddress::new(V + PAGE * u32::try_from((r >> 20) % 2048).unwrap());
                w.paging
                    .map_fixed_attr(&mut w.kernel, vaddr, frame, bytes, VregionFlags::READ_WRITE)
                    .map(|()| vaddr)
            };
            match result {
                Ok(vaddr) => {
                    assert_eq!(w.kernel.children(frame), (bytes / PAGE) as usize);
                    live.push((vaddr, frame));
                }
                Err(PagingError::RegionMapFailed { .. }) => {
                    assert_eq!(w.kernel.children(frame), 0);
                    frames.push(frame);
                }
                Err(e) => panic!("mapping {bytes:#x}: {e}"),
            }
        } else {
            let index = usize::try_from((r >> 8) % live.len() as u64).unwrap();
            let (vaddr, frame) = live.swap_remove(index);
            w.paging.unmap(&mut w.kernel, vaddr).unwrap();
            assert_eq!(w.kernel.children(frame), 0);
            assert!(w.kernel.translate(w.paging.root(), vaddr.as_u32()).is_none());
            frames.push(frame);
        }
        assert_gapless(&w);
    }

    for (vaddr, _) in live.drain(..) {
        w.paging.unmap(&mut w.kernel, vaddr).unwrap();
    }
    assert_eq!(w.layout(), initial);
    assert_eq!(w.paging.l2_table_count(), 0);
    assert_eq!(w.kernel.count_of(ObjType::VNodeArmL2), 0);
    assert_eq!(w.paging.slots().space(), slots);
}
