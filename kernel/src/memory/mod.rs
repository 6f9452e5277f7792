// Virtual memory core: user-pool frames, supplementary page tables, the
// frame table with clock eviction, the swap manager and page-fault entry.
pub mod fault;
pub mod frame;
pub mod page;
pub mod pagedir;
pub mod pool;
pub mod swap;
pub mod uaccess;

use x86_64::{PhysAddr, VirtAddr};

pub const PAGE_SIZE: usize = 4096;

// User virtual layout. Page zero stays unmapped so null dereferences fault.
pub const USER_BASE: u64 = PAGE_SIZE as u64;
pub const USER_TOP: u64 = 0xC000_0000;

// The stack may grow down to eight megabytes below the top of user space.
pub const STACK_MAX: u64 = 8 * 1024 * 1024;
pub const STACK_LIMIT: u64 = USER_TOP - STACK_MAX;

// Accesses this far below the stack pointer still count as stack growth
// (PUSHA stores 32 bytes below the stack pointer before faulting).
pub const STACK_SLACK: u64 = 32;

pub fn is_user_vaddr(addr: VirtAddr) -> bool {
    let a = addr.as_u64();
    a >= USER_BASE && a < USER_TOP
}

// Kernel-visible pointer to the user-pool frame at `kpage`. Frames live in
// the identity-mapped region, so the address doubles as a pointer.
pub fn frame_ptr(kpage: PhysAddr) -> *mut u8 {
    kpage.as_u64() as *mut u8
}
