//! Swap Engine
//!
//! Eviction and recovery of user pages. Both directions follow the same
//! discipline: all list and bitmap surgery happens under spinlocks, the
//! disk transfer happens under none. A victim is made private by excising
//! its record before the LRU lock drops, so the frame cannot be selected
//! twice, and the destination PTE is located before the transfer but only
//! rewritten after it succeeds.
//!
//! An unmap can race the engine between excision and the PTE rewrite. The
//! unmap path performs its PTE edit and its `lru_unlink` under one LRU lock
//! hold, and the engine re-checks the cancellation mark under the same lock
//! before committing, so exactly one side disposes of the frame and the
//! slot either way.

use core::sync::atomic::Ordering;

use crate::params::{BLOCKSIZE, PGSIZE, SECTORS_PER_SLOT};
use crate::types::{PhysAddr, SlotIndex, VirtAddr};
use crate::vm::address_space::AddressSpace;
use crate::vm::page::{Owner, Probe};
use crate::vm::page_table::{self, PteState, PTE_A, PTE_U};
use crate::vm::swap_space::SwapMap;
use crate::vm::Vm;

/// Why a swap-in could not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapInError {
    /// No frame available and no page evictable.
    OutOfMemory,
    /// The swap device failed mid-read.
    Disk,
}

impl Vm {
    /// Evict one resident page and push its frame onto the free-list.
    ///
    /// Returns `false` when nothing was reclaimed: the LRU is empty, the
    /// swap area is full, or the device rejected the write. In every failure
    /// case the chosen victim is left (or put back) exactly as it was.
    pub fn reclaim_one(&self) -> bool {
        let mut lru = self.lru.lock_inner();

        let picked = lru.pick_victim(|owner, frame| self.probe_candidate(owner, frame));
        let Some((frame, owner)) = picked else {
            return false;
        };
        let Some(slot) = self.swap_map.reserve() else {
            // Swap full. The victim stays linked and resident.
            log::warn!("swap: no free slot, cannot evict");
            return false;
        };
        lru.begin_evict(frame);
        drop(lru);

        // The frame is now privately owned by this call; transfer it with no
        // locks held.
        let pa = self.phys.frame_addr(frame);
        if self.write_slot(slot, pa).is_err() {
            log::error!("swap: write to slot {} failed, restoring victim", slot.0);
            self.swap_map.release(slot);
            let mut lru = self.lru.lock_inner();
            if lru.take_cancelled(frame) {
                // An unmap dropped the translation while the failed write
                // was in flight; the frame is simply free now.
                drop(lru);
                self.free_frame(pa);
                return true;
            }
            // Still resident: back onto the list at the tail.
            lru.insert(frame, owner);
            return false;
        }

        let mut lru = self.lru.lock_inner();
        if lru.take_cancelled(frame) {
            // The translation vanished while the write was in flight. The
            // page is gone; the copy on disk is meaningless.
            drop(lru);
            self.swap_map.release(slot);
            self.free_frame(pa);
            return true;
        }

        // Rewrite the PTE while the LRU lock still excludes the unmap path.
        // Only the access/dirty bits can change underneath us, so the
        // exchange loop is short.
        let pte = page_table::walk(&self.phys, owner.root, owner.va)
            .expect("swap: victim translation must remain walkable");
        let mut raw = pte.load(Ordering::Acquire);
        loop {
            debug_assert!(
                matches!(page_table::decode(raw), PteState::Resident { pa: p, .. } if p == pa),
                "swap: victim PTE changed without cancellation: {:#x}",
                raw
            );
            let swapped = page_table::encode_swapped(slot, raw);
            match pte.compare_exchange(raw, swapped, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(seen) => raw = seen,
            }
        }
        lru.finish_evict(frame);
        drop(lru);

        page_table::flush_address_space(owner.root);
        self.free_frame(pa);
        true
    }

    /// Clock probe: resolve a candidate's back-reference to its PTE and
    /// apply second-chance. Stale records (no translation, or one that no
    /// longer names this frame) are skipped.
    fn probe_candidate(&self, owner: Owner, frame: u32) -> Probe {
        let frame_pa = self.phys.frame_addr(frame);
        let Some(pte) = page_table::walk(&self.phys, owner.root, owner.va) else {
            return Probe::Stale;
        };
        let raw = pte.load(Ordering::Acquire);
        match page_table::decode(raw) {
            PteState::Resident { pa, flags } if pa == frame_pa && flags & PTE_U != 0 => {
                if flags & PTE_A != 0 {
                    pte.fetch_and(!PTE_A, Ordering::AcqRel);
                    Probe::Referenced
                } else {
                    Probe::Evict
                }
            }
            _ => Probe::Stale,
        }
    }

    /// Bring a swapped page back for `space` at `va` (page-aligned by the
    /// caller). Succeeds trivially if a concurrent fault already resolved
    /// the page.
    pub(crate) fn swap_in(&self, space: &AddressSpace, va: VirtAddr) -> Result<(), SwapInError> {
        // Read the slot index under the space's lock, then drop it: the
        // transfer below may sleep, and the frame allocation may itself
        // recurse into eviction.
        let slot = {
            let _guard = space.lock();
            match page_table::walk(&self.phys, space.root(), va)
                .map(|pte| page_table::decode(pte.load(Ordering::Acquire)))
            {
                Some(PteState::Swapped { slot, .. }) => slot,
                // Already resident again, or unmapped underneath us. The
                // faulting access just retries.
                _ => return Ok(()),
            }
        };

        let Some(pa) = self.alloc_frame() else {
            return Err(SwapInError::OutOfMemory);
        };
        if self.read_slot(slot, pa).is_err() {
            log::error!("swap: read of slot {} failed", slot.0);
            self.free_frame(pa);
            return Err(SwapInError::Disk);
        }

        let guard = space.lock();
        let installed = match page_table::walk(&self.phys, space.root(), va) {
            Some(pte) => {
                let raw = pte.load(Ordering::Acquire);
                match page_table::decode(raw) {
                    PteState::Swapped { slot: s, flags } if s == slot => {
                        self.swap_map.release(slot);
                        // Set A so the clock does not immediately re-evict
                        // the page it just recovered.
                        pte.store(
                            page_table::encode_resident(pa, flags | PTE_A),
                            Ordering::Release,
                        );
                        self.lru.insert(
                            self.phys.frame_index(pa),
                            Owner {
                                root: space.root(),
                                va,
                            },
                        );
                        true
                    }
                    // A concurrent fault on the same PTE won the race and
                    // already released the slot.
                    _ => false,
                }
            }
            None => false,
        };
        drop(guard);

        if installed {
            page_table::flush_address_space(space.root());
        } else {
            self.free_frame(pa);
        }
        Ok(())
    }

    // ========================================================================
    // Sector Shuttling
    // ========================================================================

    // Each transfer counts itself once on success, whatever path asked for
    // it, so the user-visible counters track the device exactly.

    fn write_slot(&self, slot: SlotIndex, pa: PhysAddr) -> Result<(), crate::dev::BlockError> {
        let base = SwapMap::slot_sector(slot);
        let mut buf = [0u8; BLOCKSIZE];
        for s in 0..SECTORS_PER_SLOT {
            self.phys.read_frame(pa, s * BLOCKSIZE, &mut buf);
            self.swap_dev.write_sector(base + s as u64, &buf)?;
        }
        self.stats().swap_writes.inc();
        Ok(())
    }

    fn read_slot(&self, slot: SlotIndex, pa: PhysAddr) -> Result<(), crate::dev::BlockError> {
        let base = SwapMap::slot_sector(slot);
        let mut buf = [0u8; BLOCKSIZE];
        for s in 0..SECTORS_PER_SLOT {
            self.swap_dev.read_sector(base + s as u64, &mut buf)?;
            self.phys.write_frame(pa, s * BLOCKSIZE, &buf);
        }
        self.stats().swap_reads.inc();
        Ok(())
    }

    /// Read a slot into a kernel buffer. Fork uses this to materialize a
    /// parent's swapped page into the child without touching the parent's
    /// translation.
    pub(crate) fn read_slot_bytes(
        &self,
        slot: SlotIndex,
        buf: &mut [u8; PGSIZE],
    ) -> Result<(), crate::dev::BlockError> {
        let base = SwapMap::slot_sector(slot);
        let mut sector = [0u8; BLOCKSIZE];
        for s in 0..SECTORS_PER_SLOT {
            self.swap_dev.read_sector(base + s as u64, &mut sector)?;
            buf[s * BLOCKSIZE..(s + 1) * BLOCKSIZE].copy_from_slice(&sector);
        }
        self.stats().swap_reads.inc();
        Ok(())
    }
}
