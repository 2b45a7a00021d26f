//! Copyin/Copyout - User/Kernel Data Transfer
//!
//! Page-by-page transfers between kernel buffers and user virtual memory.
//! Bad user pointers come back as error codes, never as a kernel panic.
//!
//! A transfer is also an access: each touched page gets its `A` bit (and
//! `D` on writes), exactly as the MMU would stamp it, which keeps the clock
//! honest about what user code is using. A page found swapped is resolved
//! through the page-fault path and the transfer retried, so callers see
//! demand paging transparently.

use core::sync::atomic::Ordering;

use crate::params::{MAXVA, PGSIZE};
use crate::types::VirtAddr;
use crate::vm::address_space::AddressSpace;
use crate::vm::fault::{handle_page_fault, FaultKind, FaultResult};
use crate::vm::page_table::{self, PteState, PTE_A, PTE_D, PTE_U, PTE_W};
use crate::vm::Vm;

// ============================================================================
// Errors
// ============================================================================

/// Transfer errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyError {
    /// Address past the user range.
    BadAddress,
    /// No mapping behind the address.
    NotMapped,
    /// Mapping present but does not permit the access.
    Protection,
    /// A swapped page could not be brought back.
    NoMemory,
}

#[derive(Clone, Copy)]
enum Dir {
    In,
    Out,
}

// ============================================================================
// Transfers
// ============================================================================

/// Copy `src` into user memory at `dstva`.
pub fn copyout(
    vm: &Vm,
    space: &AddressSpace,
    dstva: VirtAddr,
    src: &[u8],
) -> Result<(), CopyError> {
    transfer(vm, space, dstva, src.as_ptr() as *mut u8, src.len(), Dir::Out)
}

/// Copy user memory at `srcva` into `dst`.
pub fn copyin(
    vm: &Vm,
    space: &AddressSpace,
    dst: &mut [u8],
    srcva: VirtAddr,
) -> Result<(), CopyError> {
    transfer(vm, space, srcva, dst.as_mut_ptr(), dst.len(), Dir::In)
}

fn transfer(
    vm: &Vm,
    space: &AddressSpace,
    mut va: VirtAddr,
    mut buf: *mut u8,
    mut len: usize,
    dir: Dir,
) -> Result<(), CopyError> {
    while len > 0 {
        if va.0 >= MAXVA {
            return Err(CopyError::BadAddress);
        }
        let page = VirtAddr(va.0 - va.page_offset() as u64);
        let offset = va.page_offset();
        let n = len.min(PGSIZE - offset);

        copy_one(vm, space, page, offset, buf, n, dir)?;

        va = VirtAddr(va.0 + n as u64);
        // SAFETY: buf spans the caller's slice; n never exceeds what is left.
        buf = unsafe { buf.add(n) };
        len -= n;
    }
    Ok(())
}

/// Move `n` bytes within one user page, faulting the page in if needed.
fn copy_one(
    vm: &Vm,
    space: &AddressSpace,
    page: VirtAddr,
    offset: usize,
    buf: *mut u8,
    n: usize,
    dir: Dir,
) -> Result<(), CopyError> {
    loop {
        {
            let _guard = space.lock();
            let Some(pte) = page_table::walk(vm.phys(), space.root(), page) else {
                return Err(CopyError::NotMapped);
            };
            match page_table::decode(pte.load(Ordering::Acquire)) {
                PteState::Resident { pa, flags } => {
                    if flags & PTE_U == 0 {
                        return Err(CopyError::Protection);
                    }
                    match dir {
                        Dir::Out => {
                            if flags & PTE_W == 0 {
                                return Err(CopyError::Protection);
                            }
                            pte.fetch_or(PTE_A | PTE_D, Ordering::AcqRel);
                            // SAFETY: buf has n readable bytes; the range
                            // stays inside one frame.
                            let src = unsafe { core::slice::from_raw_parts(buf, n) };
                            vm.phys().write_frame(pa, offset, src);
                        }
                        Dir::In => {
                            pte.fetch_or(PTE_A, Ordering::AcqRel);
                            // SAFETY: buf has n writable bytes.
                            let dst = unsafe { core::slice::from_raw_parts_mut(buf, n) };
                            vm.phys().read_frame(pa, offset, dst);
                        }
                    }
                    return Ok(());
                }
                PteState::Swapped { .. } => {}
                PteState::Unmapped => return Err(CopyError::NotMapped),
            }
        }
        // Swapped: resolve through the fault path with no lock held, then
        // retry the page.
        let kind = match dir {
            Dir::In => FaultKind::Load,
            Dir::Out => FaultKind::Store,
        };
        match handle_page_fault(vm, space, page, kind) {
            FaultResult::Resolved => {}
            FaultResult::KillProcess => return Err(CopyError::NoMemory),
            FaultResult::NotHandled => return Err(CopyError::NotMapped),
        }
    }
}
