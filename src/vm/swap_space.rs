//! Swap Space Map
//!
//! Bitmap allocator over the swap device. One bit per slot, one slot per
//! page; slot `i` occupies sectors `[i*8, (i+1)*8)`. The map lives in RAM
//! only: the device carries no metadata and the swap area does not survive
//! a reboot.

use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

use crate::params::SECTORS_PER_SLOT;
use crate::types::SlotIndex;

struct MapInner {
    /// One bit per slot; set means reserved.
    bits: Vec<u64>,
    used: usize,
}

/// The swap slot allocator.
pub struct SwapMap {
    inner: Mutex<MapInner>,
    nslots: usize,
}

impl SwapMap {
    /// Create a map for `nslots` slots, all free.
    pub fn new(nslots: usize) -> Self {
        Self {
            inner: Mutex::new(MapInner {
                bits: vec![0u64; nslots.div_ceil(64)],
                used: 0,
            }),
            nslots,
        }
    }

    /// Reserve the first free slot, scanning from slot zero.
    pub fn reserve(&self) -> Option<SlotIndex> {
        let mut inner = self.inner.lock();
        for word_idx in 0..inner.bits.len() {
            let word = inner.bits[word_idx];
            if word != u64::MAX {
                let bit = word.trailing_ones() as usize;
                let slot = word_idx * 64 + bit;
                if slot >= self.nslots {
                    return None;
                }
                inner.bits[word_idx] |= 1 << bit;
                inner.used += 1;
                return Some(SlotIndex(slot as u32));
            }
        }
        None
    }

    /// Release a reserved slot. Releasing a free slot is a fatal invariant
    /// violation.
    pub fn release(&self, slot: SlotIndex) {
        let mut inner = self.inner.lock();
        let (word, bit) = (slot.0 as usize / 64, slot.0 as usize % 64);
        assert!(
            (slot.0 as usize) < self.nslots && inner.bits[word] & (1 << bit) != 0,
            "release_slot: slot {} not reserved",
            slot.0
        );
        inner.bits[word] &= !(1 << bit);
        inner.used -= 1;
    }

    /// Is this slot reserved? Inspection surface for invariant checks.
    pub fn is_reserved(&self, slot: SlotIndex) -> bool {
        let inner = self.inner.lock();
        let (word, bit) = (slot.0 as usize / 64, slot.0 as usize % 64);
        (slot.0 as usize) < self.nslots && inner.bits[word] & (1 << bit) != 0
    }

    /// Reserved slot count.
    pub fn used(&self) -> usize {
        self.inner.lock().used
    }

    /// Total slot count.
    pub fn capacity(&self) -> usize {
        self.nslots
    }

    /// First sector of a slot on the swap device.
    pub fn slot_sector(slot: SlotIndex) -> u64 {
        slot.0 as u64 * SECTORS_PER_SLOT as u64
    }
}
