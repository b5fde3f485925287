use bitfield_struct::bitfield;

/// Access rights of a virtual mapping.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct VregionFlags {
    /// Readable (bit 0).
    pub read: bool,
    /// Writable (bit 1).
    pub write: bool,
    /// Executable (bit 2).
    pub execute: bool,
    /// Uncached, for device memory (bit 3).
    pub nocache: bool,
    #[bits(28)]
    __: u32,
}

impl VregionFlags {
    pub const READ: Self = Self::new().with_read(true);
    pub const READ_WRITE: Self = Self::READ.with_write(true);
    pub const READ_EXECUTE: Self = Self::READ.with_execute(true);
    pub const READ_WRITE_NOCACHE: Self = Self::READ_WRITE.with_nocache(true);
}
