// Shared fixture: boot a kernel against in-memory devices, simulate user
// loads and stores through the page-fault path the way the MMU would, and
// issue syscalls by building the user stack a real trap would carry.
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use x86_64::structures::paging::{Page, PageTableFlags};
use x86_64::VirtAddr;

use crate::console::BufferedConsole;
use crate::drivers::disk::RamDisk;
use crate::fs::ramfs::RamFs;
use crate::kctx::{Kernel, KernelConfig, ProgramLoader};
use crate::memory::fault::{handle_page_fault, FaultCode};
use crate::memory::swap::SECTORS_PER_PAGE;
use crate::memory::{frame_ptr, PAGE_SIZE, USER_TOP};
use crate::process::{Pid, Process};
use crate::syscall::{syscall_entry, Action, TrapFrame, SYS_EXIT};

// Default user stack pointer for tests, a little below the top of user
// space.
pub const TEST_ESP: u64 = USER_TOP - 0x4000;

pub fn boot(user_frames: usize, swap_pages: usize) -> (Arc<Kernel>, Arc<BufferedConsole>) {
    boot_with_loader(user_frames, swap_pages, None)
}

pub fn boot_with_loader(
    user_frames: usize,
    swap_pages: usize,
    loader: Option<Box<dyn ProgramLoader>>,
) -> (Arc<Kernel>, Arc<BufferedConsole>) {
    let console = Arc::new(BufferedConsole::new());
    let disk = RamDisk::new((swap_pages * SECTORS_PER_PAGE) as u64);
    let kernel = Kernel::new(
        KernelConfig { user_frames },
        Box::new(disk),
        Box::new(RamFs::new()),
        console.clone(),
        loader,
    );
    (Arc::new(kernel), console)
}

// Store through user virtual memory, faulting pages in like a user-mode
// write would. Returns false when the fault handler kills the access.
pub fn user_store(
    kernel: &Kernel,
    proc: &Arc<Process>,
    esp: VirtAddr,
    addr: VirtAddr,
    bytes: &[u8],
) -> bool {
    let mut done = 0usize;
    while done < bytes.len() {
        let va = addr + done as u64;
        let upage = Page::containing_address(va);
        let offset = (va.as_u64() % PAGE_SIZE as u64) as usize;
        let chunk = (PAGE_SIZE - offset).min(bytes.len() - done);

        // The lock is held across the copy so eviction cannot pull the
        // frame mid-access, the same guarantee the MMU's atomicity gives
        // a real user store.
        let mut pagedir = proc.pagedir.lock();
        match pagedir.translate(upage) {
            Some((kpage, flags)) => {
                if !flags.contains(PageTableFlags::WRITABLE) {
                    return false;
                }
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        bytes[done..].as_ptr(),
                        frame_ptr(kpage).add(offset),
                        chunk,
                    );
                }
                pagedir.mark_access(upage, true);
                done += chunk;
            }
            None => {
                drop(pagedir);
                let code = FaultCode::WRITE | FaultCode::USER;
                if handle_page_fault(kernel, proc, va, esp, code).is_err() {
                    return false;
                }
            }
        }
    }
    true
}

// Load from user virtual memory, faulting pages in like a user-mode read.
pub fn user_load(
    kernel: &Kernel,
    proc: &Arc<Process>,
    esp: VirtAddr,
    addr: VirtAddr,
    len: usize,
) -> Option<Vec<u8>> {
    let mut out = vec![0u8; len];
    let mut done = 0usize;
    while done < len {
        let va = addr + done as u64;
        let upage = Page::containing_address(va);
        let offset = (va.as_u64() % PAGE_SIZE as u64) as usize;
        let chunk = (PAGE_SIZE - offset).min(len - done);

        let mut pagedir = proc.pagedir.lock();
        match pagedir.translate(upage) {
            Some((kpage, _)) => {
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        frame_ptr(kpage).add(offset),
                        out[done..].as_mut_ptr(),
                        chunk,
                    );
                }
                pagedir.mark_access(upage, false);
                done += chunk;
            }
            None => {
                drop(pagedir);
                if handle_page_fault(kernel, proc, va, esp, FaultCode::USER).is_err() {
                    return None;
                }
            }
        }
    }
    Some(out)
}

// Issue a syscall the way the trap stub would: number and arguments as
// 32-bit words on the user stack, result in eax.
pub fn syscall(kernel: &Kernel, proc: &Arc<Process>, nr: u32, args: &[u32]) -> (Action, u32) {
    syscall_at(kernel, proc, VirtAddr::new(TEST_ESP), nr, args)
}

pub fn syscall_at(
    kernel: &Kernel,
    proc: &Arc<Process>,
    esp: VirtAddr,
    nr: u32,
    args: &[u32],
) -> (Action, u32) {
    let mut words = Vec::new();
    words.extend_from_slice(&nr.to_le_bytes());
    for &arg in args {
        words.extend_from_slice(&arg.to_le_bytes());
    }
    assert!(
        user_store(kernel, proc, esp, esp, &words),
        "building the syscall stack failed"
    );

    let mut frame = TrapFrame { esp, eax: 0 };
    let action = syscall_entry(kernel, proc, &mut frame);
    (action, frame.eax)
}

// NUL-terminated string in user memory, for path and command arguments.
pub fn store_cstr(kernel: &Kernel, proc: &Arc<Process>, esp: VirtAddr, addr: VirtAddr, s: &str) {
    let mut bytes = Vec::from(s.as_bytes());
    bytes.push(0);
    assert!(user_store(kernel, proc, esp, addr, &bytes));
}

// Create a file and fill it, bypassing the syscall layer.
pub fn make_file(kernel: &Kernel, name: &str, data: &[u8]) {
    let mut fs = kernel.filesys.lock();
    assert!(fs.create(name, data.len() as u32));
    let file = fs.open(name).expect("file just created");
    assert_eq!(file.write_at(data, 0), data.len() as u32);
}

// Current on-disk contents of a file.
pub fn read_file(kernel: &Kernel, name: &str) -> Vec<u8> {
    let fs = kernel.filesys.lock();
    let file = fs.open(name).expect("file exists");
    let mut buf = vec![0u8; file.length() as usize];
    file.read_at(&mut buf, 0);
    buf
}

// EXEC collaborator that runs scripted children synchronously. "child"
// exits with status 42.
pub struct ScriptedLoader;

impl ProgramLoader for ScriptedLoader {
    fn execute(&self, kernel: &Kernel, cmd: &str) -> Option<Pid> {
        match cmd {
            "child" => {
                let child = kernel.procs.spawn("child");
                let pid = child.pid;
                let (action, _) = syscall(kernel, &child, SYS_EXIT, &[42]);
                assert_eq!(action, Action::Exit(42));
                Some(pid)
            }
            _ => None,
        }
    }
}
