// Pointer validation for the syscall gate. Each helper proves that every
// referenced user byte lies in user space and is covered by a live page
// descriptor (growing the stack when the pointer is a plausible stack
// access), then makes the pages resident and pinned so the syscall body
// can touch them without racing eviction. The unpin_* helpers release
// exactly the same pages; the PinSet records everything pinned during one
// call so the gate can release it all on any exit path.
use alloc::string::String;
use alloc::vec::Vec;
use x86_64::structures::paging::{Page, Size4KiB};
use x86_64::VirtAddr;

use crate::kctx::Kernel;
use crate::memory::{is_user_vaddr, page, uaccess};
use crate::process::Process;

use super::Trap;

pub struct PinSet {
    pages: Vec<Page>,
}

impl PinSet {
    pub fn new() -> Self {
        Self { pages: Vec::new() }
    }

    fn record(&mut self, upage: Page) {
        if !self.pages.contains(&upage) {
            self.pages.push(upage);
        }
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }
}

impl Default for PinSet {
    fn default() -> Self {
        Self::new()
    }
}

// Pin the page containing `addr`, growing the stack first when the
// address looks like a stack access.
fn pin_user_page(
    kernel: &Kernel,
    proc: &Process,
    esp: VirtAddr,
    pins: &mut PinSet,
    addr: VirtAddr,
) -> Result<(), Trap> {
    if !is_user_vaddr(addr) {
        return Err(Trap::Exit(-1));
    }
    let upage = Page::containing_address(addr);

    let tracked = proc.page_map.lock().lookup(upage).is_some();
    if !tracked && !page::grow_stack_if_necessary(proc, esp, addr) {
        return Err(Trap::Exit(-1));
    }

    match page::pin_page(kernel, proc, upage) {
        Ok(_) => {
            pins.record(upage);
            Ok(())
        }
        Err(_) => Err(Trap::Exit(-1)),
    }
}

// Validate the one page containing `addr`.
pub fn validate_ptr(
    kernel: &Kernel,
    proc: &Process,
    esp: VirtAddr,
    pins: &mut PinSet,
    addr: VirtAddr,
) -> Result<(), Trap> {
    pin_user_page(kernel, proc, esp, pins, addr)
}

// Validate every page intersecting [addr, addr + len).
pub fn validate_range(
    kernel: &Kernel,
    proc: &Process,
    esp: VirtAddr,
    pins: &mut PinSet,
    addr: VirtAddr,
    len: u32,
) -> Result<(), Trap> {
    if len == 0 {
        return Ok(());
    }
    let last_byte = addr
        .as_u64()
        .checked_add(len as u64 - 1)
        .ok_or(Trap::Exit(-1))?;
    let last = Page::<Size4KiB>::containing_address(VirtAddr::new(last_byte));

    let mut va = addr;
    loop {
        pin_user_page(kernel, proc, esp, pins, va)?;
        let upage = Page::containing_address(va);
        if upage == last {
            return Ok(());
        }
        va = (upage + 1).start_address();
    }
}

// Validate successive pages until a NUL byte, reading each page only
// after it is pinned. Returns the string's bytes, lossily decoded.
pub fn validate_string(
    kernel: &Kernel,
    proc: &Process,
    esp: VirtAddr,
    pins: &mut PinSet,
    addr: VirtAddr,
) -> Result<String, Trap> {
    let mut bytes: Vec<u8> = Vec::new();
    let mut va = addr;
    loop {
        pin_user_page(kernel, proc, esp, pins, va)?;
        let upage = Page::<Size4KiB>::containing_address(va);
        let page_end = (upage + 1).start_address();
        while va < page_end {
            let byte = uaccess::read_user_byte(proc, va).ok_or(Trap::Exit(-1))?;
            if byte == 0 {
                return Ok(String::from_utf8_lossy(&bytes).into_owned());
            }
            bytes.push(byte);
            va = va + 1u64;
        }
        // String continues on the next page; pin it before reading on
    }
}

// The unpin side of the trio. Clearing a pin is idempotent, so releasing
// through both a handler and the gate's PinSet is harmless.
pub fn unpin_ptr(kernel: &Kernel, proc: &Process, addr: VirtAddr) {
    if is_user_vaddr(addr) {
        page::unpin_page(kernel, proc, Page::containing_address(addr));
    }
}

pub fn unpin_range(kernel: &Kernel, proc: &Process, addr: VirtAddr, len: u32) {
    if len == 0 {
        return;
    }
    let Some(last_byte) = addr.as_u64().checked_add(len as u64 - 1) else {
        return;
    };
    let last = Page::<Size4KiB>::containing_address(VirtAddr::new(last_byte));
    let mut upage = Page::containing_address(addr);
    loop {
        page::unpin_page(kernel, proc, upage);
        if upage == last {
            return;
        }
        upage = upage + 1;
    }
}

pub fn unpin_string(kernel: &Kernel, proc: &Process, addr: VirtAddr) {
    let mut va = addr;
    loop {
        let upage = Page::<Size4KiB>::containing_address(va);
        let page_end = (upage + 1).start_address();
        let mut saw_nul = false;
        while va < page_end {
            match uaccess::read_user_byte(proc, va) {
                Some(0) | None => {
                    saw_nul = true;
                    break;
                }
                Some(_) => va = va + 1u64,
            }
        }
        page::unpin_page(kernel, proc, upage);
        if saw_nul {
            return;
        }
        va = page_end;
    }
}

// Release everything recorded during the current syscall.
pub fn unpin_all(kernel: &Kernel, proc: &Process, pins: &mut PinSet) {
    for upage in core::mem::take(&mut pins.pages) {
        page::unpin_page(kernel, proc, upage);
    }
}
