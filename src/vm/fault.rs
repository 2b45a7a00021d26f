//! Page-Fault Dispatch
//!
//! Entry point the trap handler calls for user page faults. This subsystem
//! claims exactly one case: a PTE marked swapped, which goes to the swap
//! engine. Everything else is reported back unhandled so the trap path can
//! apply its other strategies or kill the process.

use core::sync::atomic::Ordering;

use crate::params::{trunc_page, MAXVA};
use crate::types::VirtAddr;
use crate::vm::address_space::AddressSpace;
use crate::vm::page_table::{self, PteState};
use crate::vm::swap::SwapInError;
use crate::vm::Vm;

// ============================================================================
// Fault Types
// ============================================================================

/// The access that faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Read access.
    Load,
    /// Write access.
    Store,
}

/// Outcome of fault dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultResult {
    /// The faulting access can be retried.
    Resolved,
    /// Not this subsystem's fault to handle.
    NotHandled,
    /// Unrecoverable for the faulting process.
    KillProcess,
}

// ============================================================================
// Dispatch
// ============================================================================

/// Handle a user page fault at `va` in `space`.
pub fn handle_page_fault(
    vm: &Vm,
    space: &AddressSpace,
    va: VirtAddr,
    kind: FaultKind,
) -> FaultResult {
    vm.stats().faults.inc();
    if va.0 >= MAXVA {
        return FaultResult::NotHandled;
    }
    let page = VirtAddr(trunc_page(va.0));

    let swapped = {
        let _guard = space.lock();
        matches!(
            page_table::walk(vm.phys(), space.root(), page)
                .map(|pte| page_table::decode(pte.load(Ordering::Acquire))),
            Some(PteState::Swapped { .. })
        )
    };
    if !swapped {
        return FaultResult::NotHandled;
    }

    match vm.swap_in(space, page) {
        Ok(()) => {
            vm.stats().swap_in_faults.inc();
            FaultResult::Resolved
        }
        Err(SwapInError::OutOfMemory) => {
            log::warn!("fault: no memory for swap-in at {:#x}, killing", va);
            vm.stats().fault_kills.inc();
            FaultResult::KillProcess
        }
        Err(SwapInError::Disk) => {
            log::error!("fault: swap device failed at {:#x} ({:?}), killing", va, kind);
            vm.stats().fault_kills.inc();
            FaultResult::KillProcess
        }
    }
}
