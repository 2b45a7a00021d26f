//! Demand-Paged Virtual Memory Subsystem
//!
//! Provides physical memory management with swap-backed eviction:
//! - frame: free-list of physical frames
//! - page: per-frame metadata and the LRU/clock victim selector
//! - swap_space: bitmap allocator over the swap device
//! - swap: the eviction and swap-in engine
//! - page_table: Sv39 tables and the three-state PTE encoding
//! - address_space: map/unmap/fork/exit lifecycle hooks
//! - copyio: user/kernel transfers that honor swapped pages
//! - fault: page-fault dispatch
//! - stats: transfer counters and the swapstat call
//!
//! Allocation flows through the frame pool; when the pool runs dry the swap
//! engine evicts a victim chosen by the clock and refills it. A fault on a
//! swapped PTE takes the reverse path. Lock order everywhere is address
//! space, then LRU, then swap bitmap, then frame pool; nothing holds a
//! spinlock across a disk transfer.

pub mod address_space;
pub mod copyio;
pub mod fault;
pub mod frame;
pub mod page;
pub mod page_table;
pub mod phys;
pub mod stats;
pub mod swap;
pub mod swap_space;

pub use address_space::{AddressSpace, VmError};
pub use copyio::{copyin, copyout, CopyError};
pub use fault::{handle_page_fault, FaultKind, FaultResult};
pub use page::{Owner, PageLru, Probe, Unlink};
pub use page_table::{PteState, PTE_R, PTE_U, PTE_W, PTE_X};
pub use phys::PhysMemory;
pub use stats::{StatsSnapshot, VmStats};
pub use swap::SwapInError;
pub use swap_space::SwapMap;

use alloc::sync::Arc;
use spin::Once;

use crate::dev::BlockDevice;
use crate::params::{ALLOC_FILL, FREE_FILL, PGSIZE, SECTORS_PER_SLOT, SWAP_SLOTS};
use crate::types::PhysAddr;
use crate::vm::frame::FramePool;

// ============================================================================
// Subsystem Handle
// ============================================================================

/// The paging subsystem: one per machine, owning the managed frame range,
/// the replacement state, and the swap device.
pub struct Vm {
    pub(crate) phys: PhysMemory,
    pub(crate) pool: FramePool,
    pub(crate) lru: PageLru,
    pub(crate) swap_map: SwapMap,
    pub(crate) swap_dev: Arc<dyn BlockDevice>,
    stats: VmStats,
}

impl Vm {
    /// Bring up the subsystem over the physical range described by `phys`
    /// and the given swap device. Slot count is bounded by both the device
    /// capacity and the configured swap area size.
    pub fn new(phys: PhysMemory, swap_dev: Arc<dyn BlockDevice>) -> Self {
        let nframes = phys.nframes();
        let dev_slots = (swap_dev.nsectors() / SECTORS_PER_SLOT as u64) as usize;
        let nslots = dev_slots.min(SWAP_SLOTS);
        log::info!(
            "vm: managing {} frames, {} swap slots",
            nframes,
            nslots
        );
        Self {
            phys,
            pool: FramePool::new(nframes),
            lru: PageLru::new(nframes),
            swap_map: SwapMap::new(nslots),
            swap_dev,
            stats: VmStats::new(),
        }
    }

    /// Allocate one frame, evicting if the pool is empty. The frame is
    /// filled with the allocation pattern and is not yet in the LRU;
    /// inserting it once a user mapping exists is the caller's job.
    ///
    /// `None` means the free-list is empty and swap is full: true OOM.
    pub fn alloc_frame(&self) -> Option<PhysAddr> {
        loop {
            if let Some(frame) = self.pool.try_alloc() {
                let pa = self.phys.frame_addr(frame);
                self.phys.fill_frame(pa, ALLOC_FILL);
                return Some(pa);
            }
            // Another caller may grab the reclaimed frame first; as long as
            // reclamation made progress, try the list again.
            if !self.reclaim_one() {
                log::warn!("vm: out of memory, free-list empty and swap full");
                return None;
            }
        }
    }

    /// Return a frame to the pool. The caller must have removed it from the
    /// LRU first. The poison fill happens before the list lock is taken.
    pub fn free_frame(&self, pa: PhysAddr) {
        let frame = self.phys.frame_index(pa);
        self.phys.fill_frame(pa, FREE_FILL);
        self.pool.push_free(frame);
    }

    /// Subsystem counters.
    pub fn stats(&self) -> &VmStats {
        &self.stats
    }

    /// Frames currently on the free-list.
    pub fn free_frames(&self) -> usize {
        self.pool.free_count()
    }

    /// The physical window, for callers that move page contents.
    pub fn phys(&self) -> &PhysMemory {
        &self.phys
    }

    /// The clock list.
    pub fn lru(&self) -> &PageLru {
        &self.lru
    }

    /// The swap slot map.
    pub fn swap_map(&self) -> &SwapMap {
        &self.swap_map
    }
}

// ============================================================================
// Global Handle
// ============================================================================

static VM: Once<Vm> = Once::new();

/// Install the machine-wide subsystem instance. Called once at boot, after
/// the memory map is known.
///
/// # Safety
///
/// `window` must describe `size` bytes of otherwise unused memory backing
/// physical addresses `[base, base + size)` for the rest of the kernel's
/// lifetime.
pub unsafe fn init(base: PhysAddr, window: *mut u8, size: usize, swap_dev: Arc<dyn BlockDevice>) {
    assert_eq!(size % PGSIZE, 0, "vm: init size not page aligned");
    let phys = PhysMemory::new(base, window, size);
    VM.call_once(move || Vm::new(phys, swap_dev));
}

/// The machine-wide subsystem instance.
pub fn vm() -> &'static Vm {
    VM.get().expect("vm: not initialized")
}
