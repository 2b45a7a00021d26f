//! Shared harness: a kernel instance over an ordinary heap buffer standing
//! in for physical memory, plus process-style helpers that drive user pages
//! through the copy paths the way a user program would.

#![allow(dead_code)]

use std::sync::Arc;

use pager_r::dev::RamDisk;
use pager_r::params::{PGSIZE, SECTORS_PER_SLOT};
use pager_r::types::{PhysAddr, VirtAddr};
use pager_r::vm::{copyin, copyout, AddressSpace, CopyError, PhysMemory, Vm, VmError, PTE_R, PTE_W};

pub struct TestKernel {
    pub vm: Vm,
    _mem: Box<[u8]>,
}

/// Bring up a kernel with `frames` physical frames and `slots` swap slots.
pub fn kernel(frames: usize, slots: usize) -> TestKernel {
    let mut mem = vec![0u8; frames * PGSIZE].into_boxed_slice();
    // SAFETY: the arena box sits next to the Vm and outlives it; the heap
    // storage does not move when the box does.
    let phys = unsafe { PhysMemory::new(PhysAddr(0x8000_0000), mem.as_mut_ptr(), frames * PGSIZE) };
    let disk = Arc::new(RamDisk::new((slots * SECTORS_PER_SLOT) as u64));
    TestKernel {
        vm: Vm::new(phys, disk),
        _mem: mem,
    }
}

pub const USER_BASE: u64 = 0x10_0000;

/// Virtual address of the i-th test page.
pub fn page_va(i: usize) -> VirtAddr {
    VirtAddr(USER_BASE + (i * PGSIZE) as u64)
}

/// Map the i-th page read-write.
pub fn map_rw(vm: &Vm, space: &AddressSpace, i: usize) -> Result<(), VmError> {
    space.map_page(vm, page_va(i), PTE_R | PTE_W)
}

/// Fill the i-th page with one byte, as a user store would.
pub fn fill_page(vm: &Vm, space: &AddressSpace, i: usize, byte: u8) -> Result<(), CopyError> {
    copyout(vm, space, page_va(i), &[byte; PGSIZE])
}

/// Read the first byte of the i-th page, as a user load would.
pub fn read_first_byte(vm: &Vm, space: &AddressSpace, i: usize) -> Result<u8, CopyError> {
    let mut b = [0u8; 1];
    copyin(vm, space, &mut b, page_va(i))?;
    Ok(b[0])
}

/// Read the whole i-th page and assert every byte matches.
pub fn assert_page_is(vm: &Vm, space: &AddressSpace, i: usize, byte: u8) {
    let mut page = vec![0u8; PGSIZE];
    copyin(vm, space, &mut page, page_va(i)).expect("page readable");
    assert!(
        page.iter().all(|&b| b == byte),
        "page {} expected {:#x} got {:#x}",
        i,
        byte,
        page.iter().find(|&&b| b != byte).copied().unwrap()
    );
}
