//! User-process virtual memory core: supplementary page tables, a global
//! frame table with clock eviction, a swap manager, and the syscall gate
//! that validates and pins user memory across kernel I/O.
//!
//! Boot, interrupt plumbing, hardware page tables and the on-disk
//! filesystem are collaborators behind narrow interfaces; the core itself
//! is target-independent and its tests run on the host.
#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod console;
pub mod drivers;
pub mod fs;
pub mod kctx;
pub mod log;
pub mod memory;
pub mod process;
pub mod syscall;

#[cfg(test)]
mod tests;

pub use kctx::{Kernel, KernelConfig, ProgramLoader};
