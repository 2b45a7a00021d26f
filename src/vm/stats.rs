//! Swap and Fault Counters
//!
//! Kernel-wide event counters for the paging paths. The two swap transfer
//! counters are the user-visible surface, exported through the `swapstat`
//! system call; the fault counters exist for diagnosis. All counters are
//! monotonic and wrap at 64 bits.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::types::VirtAddr;
use crate::vm::address_space::AddressSpace;
use crate::vm::copyio::{copyout, CopyError};
use crate::vm::Vm;

// ============================================================================
// Counter Type
// ============================================================================

/// A named monotonic event counter.
#[derive(Debug)]
pub struct Counter {
    value: AtomicU64,
    name: &'static str,
}

impl Counter {
    /// Create a new counter at zero.
    pub const fn new(name: &'static str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name,
        }
    }

    /// Increment by 1.
    #[inline]
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Current value.
    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Counter name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

// ============================================================================
// Subsystem Counters
// ============================================================================

/// Counters for the paging subsystem.
#[derive(Debug)]
pub struct VmStats {
    /// Pages read back from the swap device.
    pub swap_reads: Counter,
    /// Pages written out to the swap device.
    pub swap_writes: Counter,
    /// Page faults dispatched to the subsystem.
    pub faults: Counter,
    /// Faults resolved by a swap-in.
    pub swap_in_faults: Counter,
    /// Faults that ended in a process kill.
    pub fault_kills: Counter,
}

impl VmStats {
    pub const fn new() -> Self {
        Self {
            swap_reads: Counter::new("swap_reads"),
            swap_writes: Counter::new("swap_writes"),
            faults: Counter::new("faults"),
            swap_in_faults: Counter::new("swap_in_faults"),
            fault_kills: Counter::new("fault_kills"),
        }
    }
}

impl Default for VmStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub swap_reads: u64,
    pub swap_writes: u64,
    pub faults: u64,
    pub swap_in_faults: u64,
    pub fault_kills: u64,
}

impl VmStats {
    /// Snapshot every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            swap_reads: self.swap_reads.get(),
            swap_writes: self.swap_writes.get(),
            faults: self.faults.get(),
            swap_in_faults: self.swap_in_faults.get(),
            fault_kills: self.fault_kills.get(),
        }
    }
}

// ============================================================================
// swapstat System Call
// ============================================================================

/// Copy the swap transfer counters to user memory as two little-endian
/// 64-bit values. Bad user addresses produce an error and leave the
/// counters untouched.
pub fn sys_swapstat(
    vm: &Vm,
    space: &AddressSpace,
    out_reads: VirtAddr,
    out_writes: VirtAddr,
) -> Result<(), CopyError> {
    let reads = vm.stats().swap_reads.get().to_le_bytes();
    let writes = vm.stats().swap_writes.get().to_le_bytes();
    copyout(vm, space, out_reads, &reads)?;
    copyout(vm, space, out_writes, &writes)?;
    Ok(())
}
