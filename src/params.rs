//! Compile-time configuration
//!
//! Every size in the subsystem derives from the four base constants below.
//! The defaults describe the QEMU virt board layout the kernel boots on;
//! `Vm::new` takes the concrete memory range discovered at boot, so smaller
//! configurations (used heavily by the test suite) need no recompilation.

/// Page size in bytes (4 KiB).
pub const PGSIZE: usize = 4096;

/// log2 of the page size.
pub const PGSHIFT: usize = 12;

/// Disk sector size in bytes.
pub const BLOCKSIZE: usize = 512;

/// Sectors per swap slot. One slot backs exactly one page.
pub const SECTORS_PER_SLOT: usize = PGSIZE / BLOCKSIZE;

/// Start of physical RAM.
pub const KERNBASE: u64 = 0x8000_0000;

/// Physical memory ceiling: 128 MiB of RAM.
pub const PHYSTOP: u64 = KERNBASE + 128 * 1024 * 1024;

/// Upper bound on frames the subsystem can manage. Sizes the free-list
/// capacity at kernel image time.
pub const MAX_FRAMES: usize = ((PHYSTOP - KERNBASE) as usize) / PGSIZE;

/// Swap area size in bytes.
pub const SWAPMAX: usize = 32 * 1024 * 1024;

/// Swap slots available. One slot per page; the slot count follows from
/// the slot size, not from a separately maintained constant.
pub const SWAP_SLOTS: usize = SWAPMAX / PGSIZE;

/// One past the highest user virtual address (Sv39 keeps user space in the
/// low half of the 39-bit range).
pub const MAXVA: u64 = 1 << 38;

/// Round an address down to its page boundary.
pub const fn trunc_page(addr: u64) -> u64 {
    addr & !(PGSIZE as u64 - 1)
}

/// Round an address up to the next page boundary.
pub const fn round_page(addr: u64) -> u64 {
    (addr + PGSIZE as u64 - 1) & !(PGSIZE as u64 - 1)
}

/// Byte pattern written into a frame when it is handed out.
pub const ALLOC_FILL: u8 = 0x05;

/// Byte pattern written into a frame when it is freed. Catches dangling
/// references to released frames.
pub const FREE_FILL: u8 = 0x01;
