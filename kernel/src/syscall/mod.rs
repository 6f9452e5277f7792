// Syscall gate. A trap from user mode arrives with the syscall number and
// its 32-bit arguments on the user stack; every word and every pointer
// argument is validated (and its pages pinned) before the typed handler
// runs, and everything pinned is released on every way out.
use alloc::sync::Arc;
use x86_64::VirtAddr;

pub mod handlers;
pub mod validate;

use crate::kctx::Kernel;
use crate::memory::uaccess;
use crate::process::{self, Process};

use self::handlers::SyscallCtx;
use self::validate::PinSet;

pub const SYS_HALT: u32 = 0;
pub const SYS_EXIT: u32 = 1;
pub const SYS_EXEC: u32 = 2;
pub const SYS_WAIT: u32 = 3;
pub const SYS_CREATE: u32 = 4;
pub const SYS_REMOVE: u32 = 5;
pub const SYS_OPEN: u32 = 6;
pub const SYS_FILESIZE: u32 = 7;
pub const SYS_READ: u32 = 8;
pub const SYS_WRITE: u32 = 9;
pub const SYS_SEEK: u32 = 10;
pub const SYS_TELL: u32 = 11;
pub const SYS_CLOSE: u32 = 12;
pub const SYS_MMAP: u32 = 13;
pub const SYS_MUNMAP: u32 = 14;
pub const SYS_CHDIR: u32 = 15;
pub const SYS_MKDIR: u32 = 16;
pub const SYS_READDIR: u32 = 17;
pub const SYS_ISDIR: u32 = 18;
pub const SYS_INUMBER: u32 = 19;

// Stack words each syscall consumes after the number, indexed by id.
const ARG_COUNTS: [usize; 20] = [0, 1, 1, 1, 2, 1, 1, 1, 3, 3, 2, 1, 1, 2, 1, 1, 1, 2, 1, 1];

// Sentinel returned by MMAP on failure
pub const MAP_FAILED: u32 = u32::MAX;

// Leaves the current process for good: a voluntary or forced exit, or a
// machine halt. Propagated with `?` from any depth of a handler; the
// gate's top frame runs the cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    Exit(i32),
    Halt,
}

pub type SysResult = Result<u32, Trap>;

// What the trap stub should do once the gate returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Resume,
    Exit(i32),
    Halt,
}

// Trap frame as the gate sees it: the user stack pointer going in, the
// return value register coming out.
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    pub esp: VirtAddr,
    pub eax: u32,
}

pub fn syscall_entry(kernel: &Kernel, proc: &Arc<Process>, frame: &mut TrapFrame) -> Action {
    let mut pins = PinSet::new();
    let result = dispatch(kernel, proc, frame.esp, &mut pins);

    // Unpin on every path out, errors and exits included
    validate::unpin_all(kernel, proc, &mut pins);

    match result {
        Ok(value) => {
            frame.eax = value;
            Action::Resume
        }
        Err(Trap::Exit(status)) => {
            process::exit(kernel, proc, status);
            Action::Exit(status)
        }
        Err(Trap::Halt) => Action::Halt,
    }
}

// One 32-bit word off the user stack, pinned and validated first.
fn read_stack_word(
    kernel: &Kernel,
    proc: &Process,
    esp: VirtAddr,
    pins: &mut PinSet,
    index: u64,
) -> Result<u32, Trap> {
    let addr = esp + index * 4;
    validate::validate_range(kernel, proc, esp, pins, addr, 4)?;
    uaccess::read_user_u32(proc, addr).ok_or(Trap::Exit(-1))
}

fn dispatch(
    kernel: &Kernel,
    proc: &Arc<Process>,
    esp: VirtAddr,
    pins: &mut PinSet,
) -> SysResult {
    let nr = read_stack_word(kernel, proc, esp, pins, 0)?;
    let argc = *ARG_COUNTS.get(nr as usize).ok_or(Trap::Exit(-1))?;

    let mut args = [0u32; 3];
    for (i, arg) in args.iter_mut().take(argc).enumerate() {
        *arg = read_stack_word(kernel, proc, esp, pins, i as u64 + 1)?;
    }

    let mut ctx = SyscallCtx {
        kernel,
        proc,
        esp,
        pins,
    };

    match nr {
        SYS_HALT => handlers::sys_halt(),
        SYS_EXIT => handlers::sys_exit(args[0] as i32),
        SYS_EXEC => handlers::sys_exec(&mut ctx, VirtAddr::new(args[0] as u64)),
        SYS_WAIT => handlers::sys_wait(&mut ctx, args[0]),
        SYS_CREATE => handlers::sys_create(&mut ctx, VirtAddr::new(args[0] as u64), args[1]),
        SYS_REMOVE => handlers::sys_remove(&mut ctx, VirtAddr::new(args[0] as u64)),
        SYS_OPEN => handlers::sys_open(&mut ctx, VirtAddr::new(args[0] as u64)),
        SYS_FILESIZE => handlers::sys_filesize(&mut ctx, args[0]),
        SYS_READ => {
            handlers::sys_read(&mut ctx, args[0], VirtAddr::new(args[1] as u64), args[2])
        }
        SYS_WRITE => {
            handlers::sys_write(&mut ctx, args[0], VirtAddr::new(args[1] as u64), args[2])
        }
        SYS_SEEK => handlers::sys_seek(&mut ctx, args[0], args[1]),
        SYS_TELL => handlers::sys_tell(&mut ctx, args[0]),
        SYS_CLOSE => handlers::sys_close(&mut ctx, args[0]),
        SYS_MMAP => handlers::sys_mmap(&mut ctx, args[0], VirtAddr::new(args[1] as u64)),
        SYS_MUNMAP => handlers::sys_munmap(&mut ctx, args[0]),
        // Directory calls are not part of this kernel
        _ => Err(Trap::Exit(-1)),
    }
}
