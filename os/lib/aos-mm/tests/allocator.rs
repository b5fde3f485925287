use aos_addresses::PhysicalAddress;
use aos_caps::sim::{SimKernel, SimOp};
use aos_caps::{CNodeRef, CapError, CapOps, CapRef, ObjType};
use aos_mm::{Allocation, MmError, PhysicalMemoryAllocator, RegionInfo, RegionState};
use aos_slab::StaticRefill;
use aos_slot::{SingleSlotAllocator, SlotAllocator, SlotError};

const PAGE: u64 = 0x1000;

type Mm = PhysicalMemoryAllocator<SingleSlotAllocator>;

struct Fixture {
    kernel: SimKernel,
    mm: Mm,
    donated: Vec<CapRef>,
}

/// An allocator with one donated RAM capability per `(base, size)` pair.
fn fixture(regions: &[(u64, u64)]) -> Fixture {
    let mut kernel = SimKernel::new();
    let boot = kernel.create_cnode(16);
    let slots = kernel.create_cnode(1024);
    let mut mm = PhysicalMemoryAllocator::new(ObjType::Ram, SingleSlotAllocator::new(slots, 1024));
    mm.grow_nodes(64);

    let mut donated = Vec::new();
    for (slot, &(base, size)) in (0u32..).zip(regions) {
        let cap = CapRef::new(boot, slot);
        kernel.mint_ram(cap, base, size).unwrap();
        mm.add(cap, PhysicalAddress::new(base), size).unwrap();
        donated.push(cap);
    }
    Fixture { kernel, mm, donated }
}

fn layout(mm: &Mm) -> Vec<(u64, u64, RegionState)> {
    mm.regions()
        .map(|r| (r.base.as_u64(), r.base.as_u64() + r.size, r.state))
        .collect()
}

/// Every Parent is tiled exactly by its ranges, and no two Free ranges of
/// the same Parent touch.
fn assert_tiling<S: SlotAllocator>(mm: &PhysicalMemoryAllocator<S>) {
    let regions: Vec<RegionInfo> = mm.regions().collect();
    for w in regions.windows(2) {
        assert!(w[0].base.as_u64() + w[0].size <= w[1].base.as_u64(), "overlap: {w:?}");
        let same_parent = w[0].parent_base == w[1].parent_base;
        let both_free = w[0].state == RegionState::Free && w[1].state == RegionState::Free;
        assert!(!(same_parent && both_free), "unmerged neighbours: {w:?}");
    }
    for p in mm.parents() {
        let mut cursor = p.base.as_u64();
        for r in regions.iter().filter(|r| r.parent_base == p.base) {
            assert_eq!(r.base.as_u64(), cursor, "gap in parent {:?}", p.base);
            cursor += r.size;
        }
        assert_eq!(cursor, p.base.as_u64() + p.size);
    }
}

/// Deterministic pseudo-random sequence for the long-running tests.
fn xorshift(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

#[test]
fn random_alloc_free_keeps_parents_tiled() {
    // Two adjacent donations, so merges across provenance would show.
    let Fixture { mut kernel, mut mm, .. } = fixture(&[(0x10_0000, 0x40_0000), (0x50_0000, 0x10_0000)]);
    let total = mm.free_bytes();
    let mut rng = 0x2545_F491_4F6C_DD1D;
    let mut live: Vec<Allocation> = Vec::new();

    for _ in 0..3000 {
        let r = xorshift(&mut rng);
        if live.len() < 24 && (live.is_empty() || r % 3 != 0) {
            let size = PAGE * (1 + (r >> 8) % 32);
            let alignment = PAGE << ((r >> 16) % 8);
            match mm.alloc_aligned(&mut kernel, size, alignment) {
                Ok(a) => {
                    assert!(a.base.as_u64().is_multiple_of(alignment));
                    assert_eq!(a.size, size);
                    live.push(a);
                }
                Err(MmError::OutOfMemory { .. }) => {}
                Err(e) => panic!("alloc of {size:#x}/{alignment:#x}: {e}"),
            }
        } else {
            let index = usize::try_from((r >> 8) % live.len() as u64).unwrap();
            let a = live.swap_remove(index);
            mm.free(&mut kernel, a.cap, a.base, a.size).unwrap();
        }
        assert_tiling(&mm);
        let in_use: u64 = live.iter().map(|a| a.size).sum();
        assert_eq!(mm.free_bytes() + in_use, total);
    }

    for a in live.drain(..) {
        mm.free(&mut kernel, a.cap, a.base, a.size).unwrap();
    }
    assert_eq!(
        layout(&mm),
        vec![
            (0x10_0000, 0x50_0000, RegionState::Free),
            (0x50_0000, 0x60_0000, RegionState::Free),
        ]
    );
}

#[test]
fn basic_alloc_free_merge() {
    let Fixture { mut kernel, mut mm, .. } = fixture(&[(0x1000, 0x3000)]);

    let a = mm.alloc(&mut kernel, PAGE).unwrap();
    let b = mm.alloc(&mut kernel, PAGE).unwrap();
    assert_eq!(a.base.as_u64(), 0x1000);
    assert_eq!(b.base.as_u64(), 0x2000);
    assert_tiling(&mm);

    mm.free(&mut kernel, a.cap, a.base, PAGE).unwrap();
    mm.free(&mut kernel, b.cap, b.base, PAGE).unwrap();
    assert_eq!(layout(&mm), vec![(0x1000, 0x4000, RegionState::Free)]);
    assert!(!kernel.contains(a.cap));
    assert!(!kernel.contains(b.cap));
}

#[test]
fn aligned_split_leaves_both_remainders() {
    let Fixture { mut kernel, mut mm, .. } = fixture(&[(0x1000, 0x5000)]);

    let a = mm.alloc_aligned(&mut kernel, 0x1000, 0x2000).unwrap();
    assert_eq!(a.base.as_u64(), 0x2000);
    assert_eq!(
        layout(&mm),
        vec![
            (0x1000, 0x2000, RegionState::Free),
            (0x2000, 0x3000, RegionState::Allocated),
            (0x3000, 0x6000, RegionState::Free),
        ]
    );
    assert_tiling(&mm);

    mm.free(&mut kernel, a.cap, a.base, a.size).unwrap();
    assert_eq!(layout(&mm), vec![(0x1000, 0x6000, RegionState::Free)]);
}

#[test]
fn minted_capabilities_honour_size_and_alignment() {
    let Fixture { mut kernel, mut mm, .. } = fixture(&[(0x1000, 0x40_0000)]);

    for (size, align) in [
        (1, 1),
        (0x1001, 0x1000),
        (0x3000, 0x4000),
        (0x1000, 0x10_0000),
        (0x5000, 0x3000),
        (0x2345, 0x8000),
    ] {
        let a = mm.alloc_aligned(&mut kernel, size, align).unwrap();
        let id = kernel.identify(a.cap).unwrap();
        let effective = align.max(PAGE).next_multiple_of(PAGE);
        assert_eq!(id.base % effective, 0, "size {size:#x} align {align:#x}");
        assert_eq!(id.bytes, size.next_multiple_of(PAGE));
        assert_eq!(id.base, a.base.as_u64());
        assert_tiling(&mm);
    }
}

#[test]
fn alloc_free_round_trip_restores_behaviour() {
    let Fixture { mut kernel, mut mm, .. } = fixture(&[(0x10_0000, 0x10_0000)]);
    let keep = mm.alloc(&mut kernel, 0x3000).unwrap();
    let before = layout(&mm);

    let tmp = mm.alloc_aligned(&mut kernel, 0x2000, 0x8000).unwrap();
    mm.free(&mut kernel, tmp.cap, tmp.base, tmp.size).unwrap();
    assert_eq!(layout(&mm), before);

    let again = mm.alloc_aligned(&mut kernel, 0x2000, 0x8000).unwrap();
    assert_eq!(again.base, tmp.base);
    assert_ne!(again.base, keep.base);
}

#[test]
fn exhaustion_boundary() {
    let Fixture { mut kernel, mut mm, .. } = fixture(&[(0x4000, 4 * PAGE)]);

    assert_eq!(
        mm.alloc(&mut kernel, 5 * PAGE),
        Err(MmError::OutOfMemory {
            size: 5 * PAGE,
            alignment: PAGE
        })
    );
    mm.alloc(&mut kernel, PAGE).unwrap();
    mm.alloc(&mut kernel, 3 * PAGE).unwrap();
    assert_eq!(mm.free_bytes(), 0);
    assert!(matches!(
        mm.alloc(&mut kernel, PAGE),
        Err(MmError::OutOfMemory { .. })
    ));
    assert_tiling(&mm);
}

#[test]
fn adjacent_donations_never_merge() {
    let Fixture { mut kernel, mut mm, .. } = fixture(&[(0x1000, 0x2000), (0x3000, 0x2000)]);

    // One range spanning both donations cannot exist.
    assert!(matches!(
        mm.alloc(&mut kernel, 0x4000),
        Err(MmError::OutOfMemory { .. })
    ));

    let a = mm.alloc(&mut kernel, 0x2000).unwrap();
    let b = mm.alloc(&mut kernel, 0x2000).unwrap();
    assert_eq!(a.base.as_u64(), 0x1000);
    assert_eq!(b.base.as_u64(), 0x3000);
    mm.free(&mut kernel, a.cap, a.base, a.size).unwrap();
    mm.free(&mut kernel, b.cap, b.base, b.size).unwrap();

    assert_eq!(
        layout(&mm),
        vec![
            (0x1000, 0x3000, RegionState::Free),
            (0x3000, 0x5000, RegionState::Free),
        ]
    );
    assert_tiling(&mm);
}

#[test]
fn merges_with_both_neighbours() {
    let Fixture { mut kernel, mut mm, .. } = fixture(&[(0x1000, 0x4000)]);
    let a = mm.alloc(&mut kernel, PAGE).unwrap();
    let b = mm.alloc(&mut kernel, PAGE).unwrap();
    let c = mm.alloc(&mut kernel, PAGE).unwrap();

    mm.free(&mut kernel, a.cap, a.base, PAGE).unwrap();
    mm.free(&mut kernel, c.cap, c.base, PAGE).unwrap();
    assert_eq!(layout(&mm).len(), 3);

    mm.free(&mut kernel, b.cap, b.base, PAGE).unwrap();
    assert_eq!(layout(&mm), vec![(0x1000, 0x5000, RegionState::Free)]);
}

#[test]
fn frees_must_match_exactly() {
    let Fixture { mut kernel, mut mm, donated } = fixture(&[(0x1000, 0x8000)]);
    let a = mm.alloc(&mut kernel, 0x4000).unwrap();

    let partial = mm.free(&mut kernel, a.cap, a.base, 0x2000);
    assert_eq!(
        partial,
        Err(MmError::InvalidRegion {
            base: a.base,
            size: 0x2000
        })
    );
    let shifted = mm.free(&mut kernel, a.cap, a.base + PAGE, 0x3000);
    assert!(matches!(shifted, Err(MmError::InvalidRegion { .. })));
    let wrong_cap = mm.free(&mut kernel, donated[0], a.base, a.size);
    assert!(matches!(wrong_cap, Err(MmError::InvalidRegion { .. })));

    assert!(kernel.contains(a.cap));
    // Sizes are rounded like allocations are.
    mm.free(&mut kernel, a.cap, a.base, 0x3001).unwrap();
}

#[test]
fn retype_failure_leaves_everything_unchanged() {
    let Fixture { mut kernel, mut mm, .. } = fixture(&[(0x1000, 0x8000)]);
    mm.alloc(&mut kernel, PAGE).unwrap();
    let before = layout(&mm);
    let nodes = mm.free_nodes();
    let slots = mm.slots().space();

    kernel.fail_after(SimOp::Retype, 0);
    let err = mm.alloc_aligned(&mut kernel, 0x2000, 0x4000).unwrap_err();
    assert_eq!(err, MmError::Capability(CapError::Refused("retype")));
    assert_eq!(layout(&mm), before);
    assert_eq!(mm.free_nodes(), nodes);
    assert_eq!(mm.slots().space(), slots);
}

#[test]
fn destroy_failure_keeps_the_allocation() {
    let Fixture { mut kernel, mut mm, .. } = fixture(&[(0x1000, 0x8000)]);
    let a = mm.alloc(&mut kernel, PAGE).unwrap();
    let before = layout(&mm);

    kernel.fail_after(SimOp::Destroy, 0);
    assert!(matches!(
        mm.free(&mut kernel, a.cap, a.base, a.size),
        Err(MmError::Capability(_))
    ));
    assert_eq!(layout(&mm), before);
    mm.free(&mut kernel, a.cap, a.base, a.size).unwrap();
}

#[test]
fn node_exhaustion_is_metadata_not_memory() {
    let mut kernel = SimKernel::new();
    let boot = kernel.create_cnode(4);
    let slots = kernel.create_cnode(16);
    let ram = CapRef::new(boot, 0);
    kernel.mint_ram(ram, 0x1000, 0x10_0000).unwrap();

    let mut mm = PhysicalMemoryAllocator::with_refill(
        ObjType::Ram,
        SingleSlotAllocator::new(slots, 16),
        StaticRefill::new(0),
    );
    mm.grow_nodes(1);
    let err = mm.add(ram, PhysicalAddress::new(0x1000), 0x10_0000).unwrap_err();
    assert_eq!(err, MmError::OutOfNodes);
    assert_eq!(mm.free_nodes(), 1);
    assert_eq!(mm.parents().count(), 0);

    mm.grow_nodes(2);
    mm.add(ram, PhysicalAddress::new(0x1000), 0x10_0000).unwrap();
    let err = mm.alloc(&mut kernel, PAGE).unwrap_err();
    assert_eq!(err, MmError::OutOfNodes);
    assert!(err.is_out_of_metadata());
    assert_eq!(mm.slots().space(), 16);
    assert_eq!(mm.free_bytes(), 0x10_0000);
}

#[test]
fn slot_exhaustion_is_metadata_not_memory() {
    let mut kernel = SimKernel::new();
    let boot = kernel.create_cnode(4);
    let slots = kernel.create_cnode(1);
    let ram = CapRef::new(boot, 0);
    kernel.mint_ram(ram, 0x1000, 0x10_0000).unwrap();
    let mut mm = PhysicalMemoryAllocator::new(ObjType::Ram, SingleSlotAllocator::new(slots, 1));
    mm.grow_nodes(8);
    mm.add(ram, PhysicalAddress::new(0x1000), 0x10_0000).unwrap();

    mm.alloc(&mut kernel, PAGE).unwrap();
    let err = mm.alloc(&mut kernel, PAGE).unwrap_err();
    assert_eq!(err, MmError::Slots(SlotError::OutOfSlots { requested: 1 }));
    assert!(err.is_out_of_metadata());
}

#[test]
fn registration_is_validated() {
    let Fixture { mut kernel, mut mm, donated } = fixture(&[(0x10_0000, 0x10_0000)]);
    let other = CapRef::new(CNodeRef::new(99), 0);

    assert!(matches!(
        mm.add(other, PhysicalAddress::new(0x18_0000), 0x10_0000),
        Err(MmError::InvalidRegion { .. })
    ));
    assert!(matches!(
        mm.add(other, PhysicalAddress::new(0x30_0800), 0x1000),
        Err(MmError::InvalidArgument(_))
    ));
    assert!(matches!(
        mm.add(other, PhysicalAddress::new(0x30_0000), 0),
        Err(MmError::InvalidArgument(_))
    ));
    assert!(matches!(
        mm.alloc(&mut kernel, 0),
        Err(MmError::InvalidArgument(_))
    ));
    assert_eq!(mm.parents().map(|p| p.cap).collect::<Vec<_>>(), donated);
}

#[test]
fn destroy_revokes_every_donation() {
    let Fixture { mut kernel, mut mm, donated } = fixture(&[(0x1000, 0x8000), (0x10_0000, 0x4000)]);
    let a = mm.alloc(&mut kernel, 0x2000).unwrap();
    let b = mm.alloc_aligned(&mut kernel, 0x4000, 0x10_0000).unwrap();
    assert_eq!(b.base.as_u64(), 0x10_0000);
    assert_eq!(mm.total_bytes(), 0xC000);

    mm.destroy(&mut kernel).unwrap();
    for cap in donated.iter().chain([&a.cap, &b.cap]) {
        assert!(!kernel.contains(*cap), "{cap} survived");
    }
}
