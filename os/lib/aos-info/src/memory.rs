//! # Memory Layout

/// Size of a base page in bytes. Every capability the allocators mint is
/// page aligned at both ends.
pub const BASE_PAGE_SIZE: u64 = 4096;

/// log2 of [`BASE_PAGE_SIZE`].
pub const BASE_PAGE_BITS: u32 = 12;

/// First virtual address handed to a domain's paging allocator.
pub const VADDR_OFFSET: u32 = 0x4000_0000;

/// Exclusive upper end of the managed virtual address range.
pub const VADDR_LIMIT: u32 = 0xFFFF_FFFF;

/// Number of entries in a first-level (ARMv7 short descriptor) page table.
pub const L1_PAGETABLE_ENTRIES: usize = 4096;

/// Number of entries in a second-level page table.
pub const L2_PAGETABLE_ENTRIES: usize = 256;

/// Bytes covered by one first-level entry.
pub const L1_SECTION_SIZE: u64 = BASE_PAGE_SIZE * L2_PAGETABLE_ENTRIES as u64; // 1 MiB

/// Number of slots in a second-level `CNode`.
pub const L2_CNODE_SLOTS: u32 = 256;

/// Size of a single capability table entry in bytes.
pub const OBJSIZE_CTE: u64 = 64;

/// Bytes of RAM consumed by a second-level `CNode`.
pub const OBJSIZE_L2CNODE: u64 = L2_CNODE_SLOTS as u64 * OBJSIZE_CTE;

/// Free node count below which an allocator grows its slab before the
/// next operation.
pub const SLAB_LOW_WATERMARK: usize = 6;

/// Free slot count below which the two-buffer slot allocator refills.
pub const SLOT_LOW_WATERMARK: u32 = 6;

/// Nodes seeded into the physical allocator before any RAM is registered.
pub const MM_BOOTSTRAP_NODES: usize = 64;

/// Nodes seeded into a fresh address space.
pub const PAGING_BOOTSTRAP_NODES: usize = 16;

const _: () = {
    assert!(BASE_PAGE_SIZE == 1 << BASE_PAGE_BITS);
    assert!(L1_SECTION_SIZE == 0x10_0000);
    assert!(L1_PAGETABLE_ENTRIES as u64 * L1_SECTION_SIZE == 1 << 32);
    assert!((VADDR_OFFSET as u64).is_multiple_of(L1_SECTION_SIZE));
    assert!(OBJSIZE_L2CNODE.is_multiple_of(BASE_PAGE_SIZE));
    assert!(SLOT_LOW_WATERMARK >= 2);
    assert!(SLAB_LOW_WATERMARK >= 2);
    assert!(MM_BOOTSTRAP_NODES >= SLAB_LOW_WATERMARK);
    assert!(PAGING_BOOTSTRAP_NODES >= SLAB_LOW_WATERMARK);
};
