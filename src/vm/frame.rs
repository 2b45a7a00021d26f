//! Frame Pool
//!
//! Free-list of 4 KiB physical frames. The list is a fixed-capacity stack of
//! frame indices sized at kernel image time, so the alloc/free hot path
//! never allocates. A membership bitmap rides along to turn a double free
//! into an immediate panic instead of silent list corruption.
//!
//! The pool knows nothing about eviction. Exhaustion handling lives in the
//! allocator front, which asks the swap engine to refill the list.

use alloc::vec;
use alloc::vec::Vec;
use heapless::Vec as FixedVec;
use spin::Mutex;

use crate::params::MAX_FRAMES;

struct PoolInner {
    free: FixedVec<u32, MAX_FRAMES>,
    /// One bit per frame: set while the frame sits on the free-list.
    on_list: Vec<u64>,
}

/// The physical frame free-list.
pub struct FramePool {
    inner: Mutex<PoolInner>,
}

impl FramePool {
    /// Create a pool covering `nframes` frames, all initially free.
    pub fn new(nframes: usize) -> Self {
        assert!(nframes <= MAX_FRAMES, "frame pool larger than MAX_FRAMES");
        let mut inner = PoolInner {
            free: FixedVec::new(),
            on_list: vec![0u64; nframes.div_ceil(64)],
        };
        // Seed in reverse so the lowest frame pops first.
        for frame in (0..nframes as u32).rev() {
            let _ = inner.free.push(frame);
            inner.set_on_list(frame, true);
        }
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Pop the free-list head. `None` means the list is empty; the caller
    /// decides whether to reclaim.
    pub fn try_alloc(&self) -> Option<u32> {
        let mut inner = self.inner.lock();
        let frame = inner.free.pop()?;
        inner.set_on_list(frame, false);
        Some(frame)
    }

    /// Push a frame back onto the list. The frame must not be in the LRU and
    /// must not already be on the list.
    pub fn push_free(&self, frame: u32) {
        let mut inner = self.inner.lock();
        if inner.is_on_list(frame) {
            panic!("free_frame: double free of frame {}", frame);
        }
        inner.set_on_list(frame, true);
        inner
            .free
            .push(frame)
            .expect("free_frame: free-list capacity exceeded");
    }

    /// Frames currently on the list.
    pub fn free_count(&self) -> usize {
        self.inner.lock().free.len()
    }
}

impl PoolInner {
    fn set_on_list(&mut self, frame: u32, on: bool) {
        let (word, bit) = (frame as usize / 64, frame as usize % 64);
        if on {
            self.on_list[word] |= 1 << bit;
        } else {
            self.on_list[word] &= !(1 << bit);
        }
    }

    fn is_on_list(&self, frame: u32) -> bool {
        let (word, bit) = (frame as usize / 64, frame as usize % 64);
        self.on_list[word] & (1 << bit) != 0
    }
}
