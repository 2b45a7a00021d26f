//! Page Metadata Table and LRU/Clock Engine
//!
//! One fixed record per managed frame, allocated once at init. Records of
//! user-resident frames are linked into a circular list through `prev`/`next`
//! indices into the same arena; linkage presence, not allocation, encodes
//! membership. The list head is the clock hand.
//!
//! Each linked record carries a back-reference to the owning translation,
//! `(page-table root, vaddr)`. The reference is not owning in either
//! direction: the PTE names the frame through its PPN field, the record
//! names the PTE location, and both sides are invalidated together on unmap.
//!
//! Victim selection is second-chance: a referenced page loses its access bit
//! and the hand moves on; an unreferenced page is the victim. The PTE probe
//! itself is supplied by the caller, which keeps this module free of any
//! page-table knowledge.

use alloc::vec::Vec;
use spin::{Mutex, MutexGuard};

use crate::types::{PhysAddr, VirtAddr};

/// Link sentinel: record not on the list.
const NIL: u32 = u32::MAX;

// ============================================================================
// Records
// ============================================================================

/// Back-reference from a frame to the translation that maps it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    /// Root page-table frame of the owning address space.
    pub root: PhysAddr,
    /// User virtual address mapped to the frame.
    pub va: VirtAddr,
}

#[derive(Debug, Clone, Copy)]
struct PageMeta {
    prev: u32,
    next: u32,
    owner: Option<Owner>,
    /// Set while the swap engine privately owns the frame, between LRU
    /// excision and arrival on the free-list.
    evicting: bool,
    /// Set when an unmap catches the frame mid-eviction. Tells the engine
    /// the translation is gone and the reserved slot must be given back.
    cancelled: bool,
}

impl PageMeta {
    const UNLINKED: Self = Self {
        prev: NIL,
        next: NIL,
        owner: None,
        evicting: false,
        cancelled: false,
    };

    fn linked(&self) -> bool {
        self.prev != NIL
    }
}

// ============================================================================
// Probe / Unlink Outcomes
// ============================================================================

/// What the caller's PTE probe found at a clock candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// PTE absent, invalid, or not user-owned; skip the record.
    Stale,
    /// Access bit was set; the probe cleared it. Second chance.
    Referenced,
    /// Access bit clear. This is the victim.
    Evict,
}

/// Outcome of an unlink request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unlink {
    /// Record was linked and has been excised; the caller may free the frame.
    Removed,
    /// The swap engine owns the frame; the caller must not free it.
    BeingSwapped,
    /// Record was already unlinked.
    NotLinked,
}

// ============================================================================
// LRU List
// ============================================================================

pub(crate) struct LruInner {
    meta: Vec<PageMeta>,
    head: u32,
    count: usize,
}

/// The clock list over user-resident frames.
pub struct PageLru {
    inner: Mutex<LruInner>,
}

impl PageLru {
    /// Create the arena for `nframes` frames, all unlinked.
    pub fn new(nframes: usize) -> Self {
        let mut meta = Vec::with_capacity(nframes);
        meta.resize(nframes, PageMeta::UNLINKED);
        Self {
            inner: Mutex::new(LruInner {
                meta,
                head: NIL,
                count: 0,
            }),
        }
    }

    /// Link a frame at the list tail, just behind the clock hand, and stamp
    /// its back-reference. The record must be unlinked.
    pub fn insert(&self, frame: u32, owner: Owner) {
        self.inner.lock().insert(frame, owner);
    }

    /// Excise a frame's record. Idempotent: unmap may race with the engine
    /// selecting the same victim, in which case the engine keeps ownership
    /// and the outcome says so.
    pub fn unlink(&self, frame: u32) -> Unlink {
        self.inner.lock().unlink(frame)
    }

    /// Clear the engine-ownership mark once the frame reaches the free-list.
    pub(crate) fn finish_evict(&self, frame: u32) {
        self.inner.lock().finish_evict(frame);
    }

    /// Linked record count.
    pub fn len(&self) -> usize {
        self.inner.lock().count
    }

    /// Is the list empty?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Is this frame currently linked?
    pub fn contains(&self, frame: u32) -> bool {
        self.inner.lock().meta[frame as usize].linked()
    }

    /// Back-reference of a linked frame.
    pub fn owner_of(&self, frame: u32) -> Option<Owner> {
        self.inner.lock().meta[frame as usize].owner
    }

    /// Snapshot of the linked frames in hand order. Inspection surface for
    /// invariant checks.
    pub fn linked_frames(&self) -> Vec<u32> {
        let inner = self.inner.lock();
        let mut out = Vec::with_capacity(inner.count);
        if inner.head == NIL {
            return out;
        }
        let mut cur = inner.head;
        loop {
            out.push(cur);
            cur = inner.meta[cur as usize].next;
            if cur == inner.head {
                break;
            }
        }
        out
    }

    pub(crate) fn lock_inner(&self) -> MutexGuard<'_, LruInner> {
        self.inner.lock()
    }
}

impl LruInner {
    pub(crate) fn insert(&mut self, frame: u32, owner: Owner) {
        let f = frame as usize;
        assert!(
            !self.meta[f].linked(),
            "lru_insert: frame {} already linked",
            frame
        );
        self.meta[f].owner = Some(owner);
        self.meta[f].evicting = false;
        self.meta[f].cancelled = false;
        if self.head == NIL {
            self.head = frame;
            self.meta[f].prev = frame;
            self.meta[f].next = frame;
        } else {
            let head = self.head as usize;
            let tail = self.meta[head].prev as usize;
            self.meta[f].next = self.head;
            self.meta[f].prev = tail as u32;
            self.meta[tail].next = frame;
            self.meta[head].prev = frame;
        }
        self.count += 1;
    }

    fn excise(&mut self, frame: u32) {
        let f = frame as usize;
        debug_assert!(self.meta[f].linked());
        if self.meta[f].next == frame {
            self.head = NIL;
        } else {
            let (prev, next) = (self.meta[f].prev as usize, self.meta[f].next as usize);
            self.meta[prev].next = next as u32;
            self.meta[next].prev = prev as u32;
            if self.head == frame {
                self.head = next as u32;
            }
        }
        self.meta[f].prev = NIL;
        self.meta[f].next = NIL;
        self.count -= 1;
    }

    /// Run the clock hand until a victim turns up. Each step consults the
    /// caller's probe against the candidate's PTE. The scan is bounded at two
    /// full revolutions: pass one clears access bits, so pass two must find a
    /// victim unless the metadata is inconsistent.
    ///
    /// The victim stays linked; the caller commits the choice with
    /// [`LruInner::begin_evict`] once its swap slot is secured.
    pub(crate) fn pick_victim<P>(&mut self, mut probe: P) -> Option<(u32, Owner)>
    where
        P: FnMut(Owner, u32) -> Probe,
    {
        if self.head == NIL {
            return None;
        }
        let limit = 2 * self.count;
        let mut scanned = 0;
        loop {
            if scanned >= limit {
                panic!("pick_victim: no evictable page after two revolutions");
            }
            let cur = self.head;
            let owner = self.meta[cur as usize]
                .owner
                .expect("pick_victim: linked record without owner");
            match probe(owner, cur) {
                Probe::Evict => return Some((cur, owner)),
                Probe::Stale | Probe::Referenced => {
                    self.head = self.meta[cur as usize].next;
                    scanned += 1;
                }
            }
        }
    }

    /// Excise the selected victim and mark it engine-owned.
    pub(crate) fn begin_evict(&mut self, frame: u32) {
        assert!(
            self.meta[frame as usize].linked(),
            "begin_evict: frame {} not linked",
            frame
        );
        self.excise(frame);
        self.meta[frame as usize].owner = None;
        self.meta[frame as usize].evicting = true;
        self.meta[frame as usize].cancelled = false;
    }

    /// See [`PageLru::unlink`]. Exposed on the inner state so unmap paths
    /// can pair the PTE edit and the bookkeeping under one lock hold.
    pub(crate) fn unlink(&mut self, frame: u32) -> Unlink {
        let f = frame as usize;
        if self.meta[f].linked() {
            self.excise(frame);
            self.meta[f].owner = None;
            Unlink::Removed
        } else if self.meta[f].evicting {
            self.meta[f].cancelled = true;
            Unlink::BeingSwapped
        } else {
            Unlink::NotLinked
        }
    }

    /// Did an unmap cancel this eviction? On `true` the ownership marks are
    /// cleared and the engine must give back the slot and the frame itself.
    pub(crate) fn take_cancelled(&mut self, frame: u32) -> bool {
        let f = frame as usize;
        assert!(
            self.meta[f].evicting,
            "take_cancelled: frame {} not being swapped",
            frame
        );
        if self.meta[f].cancelled {
            self.meta[f].evicting = false;
            self.meta[f].cancelled = false;
            true
        } else {
            false
        }
    }

    pub(crate) fn finish_evict(&mut self, frame: u32) {
        let f = frame as usize;
        assert!(
            self.meta[f].evicting,
            "finish_evict: frame {} not being swapped",
            frame
        );
        self.meta[f].evicting = false;
        self.meta[f].cancelled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(va: u64) -> Owner {
        Owner {
            root: PhysAddr(0x8000_0000),
            va: VirtAddr(va),
        }
    }

    #[test]
    fn test_insert_unlink() {
        let lru = PageLru::new(8);
        assert!(lru.is_empty());

        lru.insert(3, owner(0x1000));
        lru.insert(5, owner(0x2000));
        assert_eq!(lru.len(), 2);
        assert!(lru.contains(3));
        assert_eq!(lru.owner_of(5), Some(owner(0x2000)));
        assert_eq!(lru.linked_frames(), [3, 5]);

        assert_eq!(lru.unlink(3), Unlink::Removed);
        assert_eq!(lru.unlink(3), Unlink::NotLinked);
        assert_eq!(lru.len(), 1);
        assert_eq!(lru.linked_frames(), [5]);
    }

    #[test]
    #[should_panic(expected = "already linked")]
    fn test_double_insert_panics() {
        let lru = PageLru::new(4);
        lru.insert(1, owner(0x1000));
        lru.insert(1, owner(0x1000));
    }

    #[test]
    fn test_clock_second_chance() {
        let lru = PageLru::new(8);
        for f in 0..4 {
            lru.insert(f, owner(0x1000 * (f as u64 + 1)));
        }

        // Frames 0 and 1 referenced: the hand clears them and settles on 2.
        let mut referenced = [true, true, false, false];
        let mut inner = lru.lock_inner();
        let (victim, o) = inner
            .pick_victim(|_, f| {
                if referenced[f as usize] {
                    referenced[f as usize] = false;
                    Probe::Referenced
                } else {
                    Probe::Evict
                }
            })
            .unwrap();
        assert_eq!(victim, 2);
        assert_eq!(o, owner(0x3000));

        inner.begin_evict(victim);
        drop(inner);
        assert_eq!(lru.len(), 3);
        assert!(!lru.contains(2));

        // Unmap racing with the eviction must not free the frame.
        assert_eq!(lru.unlink(2), Unlink::BeingSwapped);
        lru.finish_evict(2);
        assert_eq!(lru.unlink(2), Unlink::NotLinked);
    }

    #[test]
    fn test_clock_skips_stale_records() {
        let lru = PageLru::new(8);
        lru.insert(0, owner(0x1000));
        lru.insert(1, owner(0x2000));
        let mut inner = lru.lock_inner();
        let (victim, _) = inner
            .pick_victim(|_, f| if f == 0 { Probe::Stale } else { Probe::Evict })
            .unwrap();
        assert_eq!(victim, 1);
    }

    #[test]
    fn test_clock_second_revolution_finds_cleared_page() {
        let lru = PageLru::new(8);
        for f in 0..3 {
            lru.insert(f, owner(0x1000 * (f as u64 + 1)));
        }
        // Every page referenced: the first revolution clears all three bits,
        // the second evicts the page the hand started on.
        let mut referenced = [true; 3];
        let mut inner = lru.lock_inner();
        let (victim, _) = inner
            .pick_victim(|_, f| {
                if referenced[f as usize] {
                    referenced[f as usize] = false;
                    Probe::Referenced
                } else {
                    Probe::Evict
                }
            })
            .unwrap();
        assert_eq!(victim, 0);
    }

    #[test]
    #[should_panic(expected = "no evictable page")]
    fn test_clock_bounded_at_two_revolutions() {
        let lru = PageLru::new(4);
        lru.insert(0, owner(0x1000));
        lru.insert(1, owner(0x2000));
        let mut inner = lru.lock_inner();
        let _ = inner.pick_victim(|_, _| Probe::Stale);
    }

    #[test]
    fn test_empty_list_has_no_victim() {
        let lru = PageLru::new(4);
        let mut inner = lru.lock_inner();
        assert!(inner.pick_victim(|_, _| Probe::Evict).is_none());
    }
}
