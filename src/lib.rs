//! Pager_R - Demand-paged virtual memory for a small RISC-V teaching kernel
//!
//! This crate provides the physical frame allocator, the second-chance page
//! replacement engine, the swap-space manager, and the address-space
//! lifecycle hooks (map, unmap, fork, exit) that keep swapped pages
//! consistent. The disk itself, the scheduler, and the trap dispatcher are
//! collaborators behind narrow interfaces.

#![cfg_attr(not(test), no_std)]
// Kernel-appropriate clippy configuration
#![allow(clippy::new_without_default)]
// Hardware flag words use explicit bit shifts for documentation
#![allow(clippy::identity_op)]

extern crate alloc;

// Core types
pub mod types;

// Compile-time configuration
pub mod params;

// Device interface
pub mod dev;

// The paging subsystem
pub mod vm;

/// Kernel component version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Component name
pub const NAME: &str = "Pager_R";
