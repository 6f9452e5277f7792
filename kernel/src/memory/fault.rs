// Page-fault entry. A fault resolves to exactly one of: a tracked page
// (demand-load it), an untracked address inside the stack growth window
// (grow, then load), or a bad reference (kill the process).
use bitflags::bitflags;
use x86_64::structures::paging::Page;
use x86_64::VirtAddr;

use crate::kctx::Kernel;
use crate::process::Process;
use crate::syscall::Trap;

use super::{is_user_vaddr, page};

bitflags! {
    // Error code pushed by the fault, hardware layout
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaultCode: u32 {
        const PRESENT = 1 << 0;
        const WRITE = 1 << 1;
        const USER = 1 << 2;
    }
}

pub fn handle_page_fault(
    kernel: &Kernel,
    proc: &Process,
    fault_addr: VirtAddr,
    esp: VirtAddr,
    code: FaultCode,
) -> Result<(), Trap> {
    if code.contains(FaultCode::PRESENT) {
        // The mapping already encodes writability, so a fault on a present
        // page is a write to a read-only page.
        return Err(Trap::Exit(-1));
    }
    if !is_user_vaddr(fault_addr) {
        return Err(Trap::Exit(-1));
    }

    let upage = Page::containing_address(fault_addr);
    let tracked = proc.page_map.lock().lookup(upage).is_some();
    if !tracked && !page::grow_stack_if_necessary(proc, esp, fault_addr) {
        return Err(Trap::Exit(-1));
    }

    // Held only while the frame is filled, released before returning to
    // user mode.
    if page::pin_page(kernel, proc, upage).is_err() {
        return Err(Trap::Exit(-1));
    }
    page::unpin_page(kernel, proc, upage);
    Ok(())
}
