use bitfield_struct::bitfield;

/// ARMv7 short-descriptor view of a virtual address.
///
/// ```text
///  31            20 19        12 11            0
/// ┌────────────────┬────────────┬───────────────┐
/// │    L1 index    │  L2 index  │  page offset  │
/// └────────────────┴────────────┴───────────────┘
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct ArmVirtualAddress {
    /// Byte offset inside the 4 KiB page (bits 0..11).
    #[bits(12)]
    pub page_offset: u16,
    /// Entry in the second-level table (bits 12..19).
    #[bits(8)]
    pub l2_index: u16,
    /// Entry in the first-level table (bits 20..31).
    #[bits(12)]
    pub l1_index: u16,
}
