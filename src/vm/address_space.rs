//! Address Spaces
//!
//! Per-process page-table roots and the lifecycle hooks the process layer
//! calls into: map, unmap, fork-copy, and exit. Each space carries one lock
//! serializing mutation of its tables; it is always the first lock taken,
//! and no allocation (hence no eviction) happens while it is held. Frames
//! for missing intermediate tables are allocated up front and the walk is
//! retried, so the map path never sleeps inside its own critical section.
//!
//! Page-table pages are ordinary frames, kernel-owned and never linked into
//! the LRU. Exit returns them to the pool after the last user page is gone.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::{Mutex, MutexGuard};

use crate::params::{MAXVA, PGSIZE};
use crate::types::{AsId, PhysAddr, VirtAddr};
use crate::vm::page::{Owner, Unlink};
use crate::vm::page_table::{
    self, PteState, WalkCreate, PTE_R, PTE_U, PTE_W, PTE_X,
};
use crate::vm::Vm;

// ============================================================================
// Errors
// ============================================================================

/// Address-space operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// No frame available and nothing evictable.
    OutOfMemory,
    /// The page is already resident or swapped.
    AlreadyMapped,
    /// Address out of range or not page-aligned.
    BadAddress,
}

// ============================================================================
// Address Space
// ============================================================================

/// A user address space: a page-table root plus the lock serializing edits
/// to it.
pub struct AddressSpace {
    id: AsId,
    root: PhysAddr,
    lock: Mutex<()>,
}

enum PageFill<'a> {
    Zero,
    Bytes(&'a [u8; PGSIZE]),
}

impl AddressSpace {
    /// Create an empty space. The root table frame comes from the pool,
    /// kernel-owned.
    pub fn new(vm: &Vm) -> Result<Self, VmError> {
        let root = vm.alloc_frame().ok_or(VmError::OutOfMemory)?;
        vm.phys().fill_frame(root, 0);
        Ok(Self {
            id: AsId::new(),
            root,
            lock: Mutex::new(()),
        })
    }

    pub fn id(&self) -> AsId {
        self.id
    }

    /// The root page-table frame. Stable for the life of the space.
    pub fn root(&self) -> PhysAddr {
        self.root
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    // ========================================================================
    // Map Hook
    // ========================================================================

    /// Establish a zero-filled user mapping at `va` with the given
    /// `PTE_R`/`PTE_W`/`PTE_X` permissions. The backing frame enters the
    /// LRU and is evictable from this point on.
    pub fn map_page(&self, vm: &Vm, va: VirtAddr, perms: u64) -> Result<(), VmError> {
        self.install_user_page(vm, va, PageFill::Zero, (perms & (PTE_R | PTE_W | PTE_X)) | PTE_U)
    }

    fn install_user_page(
        &self,
        vm: &Vm,
        va: VirtAddr,
        fill: PageFill<'_>,
        flags: u64,
    ) -> Result<(), VmError> {
        if va.0 >= MAXVA || va.page_offset() != 0 {
            return Err(VmError::BadAddress);
        }
        let pa = vm.alloc_frame().ok_or(VmError::OutOfMemory)?;
        match fill {
            PageFill::Zero => vm.phys().fill_frame(pa, 0),
            PageFill::Bytes(buf) => vm.phys().write_frame(pa, 0, buf),
        }

        let mut spare: Option<PhysAddr> = None;
        loop {
            let guard = self.lock();
            match page_table::walk_create(vm.phys(), self.root, va, &mut spare) {
                WalkCreate::Slot(pte) => {
                    if !matches!(
                        page_table::decode(pte.load(Ordering::Acquire)),
                        PteState::Unmapped
                    ) {
                        drop(guard);
                        vm.free_frame(pa);
                        if let Some(s) = spare.take() {
                            vm.free_frame(s);
                        }
                        return Err(VmError::AlreadyMapped);
                    }
                    pte.store(page_table::encode_resident(pa, flags), Ordering::Release);
                    vm.lru().insert(
                        vm.phys().frame_index(pa),
                        Owner {
                            root: self.root,
                            va,
                        },
                    );
                    drop(guard);
                    if let Some(s) = spare.take() {
                        vm.free_frame(s);
                    }
                    return Ok(());
                }
                WalkCreate::NeedFrame => {
                    drop(guard);
                    // Table frames are allocated with no space lock held, so
                    // the eviction this may trigger cannot deadlock on us.
                    let Some(table) = vm.alloc_frame() else {
                        vm.free_frame(pa);
                        return Err(VmError::OutOfMemory);
                    };
                    vm.phys().fill_frame(table, 0);
                    spare = Some(table);
                }
            }
        }
    }

    // ========================================================================
    // Unmap Hook
    // ========================================================================

    /// Drop `npages` mappings starting at page-aligned `va`. Resident frames
    /// go back to the pool, swapped pages give up their slot, holes are
    /// skipped.
    pub fn unmap_range(&self, vm: &Vm, va: VirtAddr, npages: usize) {
        assert_eq!(va.page_offset(), 0, "unmap_range: unaligned address");
        let guard = self.lock();
        for i in 0..npages {
            let page = VirtAddr(va.0 + (i * PGSIZE) as u64);
            if let Some(pte) = page_table::walk(vm.phys(), self.root, page) {
                self.clear_pte(vm, pte);
            }
        }
        drop(guard);
        page_table::flush_address_space(self.root);
    }

    /// Tear down one PTE, releasing whatever it references. Caller holds the
    /// space lock.
    fn clear_pte(&self, vm: &Vm, pte: &AtomicU64) {
        loop {
            let raw = pte.load(Ordering::Acquire);
            match page_table::decode(raw) {
                PteState::Unmapped => return,
                PteState::Resident { pa, .. } => {
                    let frame = vm.phys().frame_index(pa);
                    // The PTE edit and the unlink pair up under one LRU hold,
                    // so the engine's commit check cannot slip between them.
                    let mut lru = vm.lru().lock_inner();
                    if pte
                        .compare_exchange(raw, 0, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        // The engine swapped the page out first; re-decode.
                        continue;
                    }
                    match lru.unlink(frame) {
                        Unlink::Removed | Unlink::NotLinked => {
                            drop(lru);
                            vm.free_frame(pa);
                        }
                        // Mid-eviction: the engine owns the frame and will
                        // dispose of it and the slot it reserved.
                        Unlink::BeingSwapped => drop(lru),
                    }
                    return;
                }
                PteState::Swapped { slot, .. } => {
                    pte.store(0, Ordering::Release);
                    vm.swap_map().release(slot);
                    return;
                }
            }
        }
    }

    // ========================================================================
    // Fork Hook
    // ========================================================================

    /// Duplicate this space for a forked child. Every mapped page lands
    /// resident in the child, including pages the parent currently holds in
    /// swap; the parent keeps its slots. On failure the half-built child is
    /// torn down and nothing leaks.
    pub fn fork_copy(&self, vm: &Vm) -> Result<AddressSpace, VmError> {
        let child = AddressSpace::new(vm)?;
        let pages = {
            let _guard = self.lock();
            page_table::user_pages(vm.phys(), self.root)
        };
        let mut buf = Box::new([0u8; PGSIZE]);
        for (va, _) in pages {
            if let Err(e) = self.copy_page_into(vm, &child, va, &mut buf) {
                child.teardown(vm);
                return Err(e);
            }
        }
        Ok(child)
    }

    fn copy_page_into(
        &self,
        vm: &Vm,
        child: &AddressSpace,
        va: VirtAddr,
        buf: &mut [u8; PGSIZE],
    ) -> Result<(), VmError> {
        // Capture contents and flags. A resident page is snapshotted under
        // the parent lock; a swapped page is read from its slot with no lock
        // held. The slot is stable: only the owning space releases it, and
        // the owner is busy forking.
        let flags = {
            let guard = self.lock();
            match page_table::walk(vm.phys(), self.root, va)
                .map(|pte| page_table::decode(pte.load(Ordering::Acquire)))
            {
                Some(PteState::Resident { pa, flags }) => {
                    vm.phys().read_frame(pa, 0, buf);
                    flags
                }
                Some(PteState::Swapped { slot, flags }) => {
                    drop(guard);
                    if vm.read_slot_bytes(slot, buf).is_err() {
                        return Err(VmError::OutOfMemory);
                    }
                    flags
                }
                // Unmapped or gone: nothing to copy.
                _ => return Ok(()),
            }
        };
        // Permissions and access bits carry over; the encoding itself
        // supplies validity.
        child.install_user_page(vm, va, PageFill::Bytes(buf), flags)
    }

    // ========================================================================
    // Exit Hook
    // ========================================================================

    /// Release everything the space holds: every mapping through the unmap
    /// path (so swapped pages give back their slots), then the page-table
    /// frames themselves.
    pub fn teardown(self, vm: &Vm) {
        let pages = {
            let _guard = self.lock();
            page_table::user_pages(vm.phys(), self.root)
        };
        let guard = self.lock();
        for (va, _) in &pages {
            if let Some(pte) = page_table::walk(vm.phys(), self.root, *va) {
                self.clear_pte(vm, pte);
            }
        }
        drop(guard);
        page_table::flush_address_space(self.root);

        let _guard = self.lock();
        page_table::free_tables(vm.phys(), self.root, &mut |pa| vm.free_frame(pa));
    }

    /// Snapshot of the mapped user pages, decoded. Inspection surface for
    /// invariant checks.
    pub fn user_pages(&self, vm: &Vm) -> Vec<(VirtAddr, PteState)> {
        let _guard = self.lock();
        page_table::user_pages(vm.phys(), self.root)
            .into_iter()
            .map(|(va, raw)| (va, page_table::decode(raw)))
            .collect()
    }
}
