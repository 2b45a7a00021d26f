//! Device layer
//!
//! Only the block interface the swap engine consumes. Real disk drivers
//! live outside this crate and plug in through [`BlockDevice`].

pub mod block;

pub use block::{BlockDevice, BlockError, RamDisk};
