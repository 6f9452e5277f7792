// Typed syscall handlers. User-induced failures become Err(Trap::Exit(-1))
// and unwind to the gate, which releases pins and tears the process down;
// the filesystem lock is scoped to the narrow spans that touch files.
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use x86_64::structures::paging::Page;
use x86_64::VirtAddr;

use crate::fs::fd::{STDIN_FILENO, STDOUT_FILENO};
use crate::fs::File;
use crate::kctx::Kernel;
use crate::memory::{page, uaccess, PAGE_SIZE, STACK_LIMIT};
use crate::process::{MapId, Mapping, Pid, Process};

use super::validate::{self, PinSet};
use super::{SysResult, Trap, MAP_FAILED};

pub(crate) struct SyscallCtx<'a> {
    pub kernel: &'a Kernel,
    pub proc: &'a Arc<Process>,
    pub esp: VirtAddr,
    pub pins: &'a mut PinSet,
}

impl SyscallCtx<'_> {
    fn validate_range(&mut self, addr: VirtAddr, len: u32) -> Result<(), Trap> {
        validate::validate_range(self.kernel, self.proc, self.esp, self.pins, addr, len)
    }

    fn validate_string(&mut self, addr: VirtAddr) -> Result<String, Trap> {
        validate::validate_string(self.kernel, self.proc, self.esp, self.pins, addr)
    }

    fn file(&self, fd: u32) -> Result<Arc<dyn File>, Trap> {
        self.proc.fds.lock().get(fd).ok_or(Trap::Exit(-1))
    }
}

pub(crate) fn sys_halt() -> SysResult {
    Err(Trap::Halt)
}

pub(crate) fn sys_exit(status: i32) -> SysResult {
    Err(Trap::Exit(status))
}

pub(crate) fn sys_exec(ctx: &mut SyscallCtx, cmd_ptr: VirtAddr) -> SysResult {
    let cmd = ctx.validate_string(cmd_ptr)?;
    let pid = ctx
        .kernel
        .loader
        .as_ref()
        .and_then(|loader| loader.execute(ctx.kernel, &cmd));
    Ok(pid.map(|p| p.0).unwrap_or(u32::MAX))
}

pub(crate) fn sys_wait(ctx: &mut SyscallCtx, pid: u32) -> SysResult {
    let status = ctx.kernel.procs.wait(Pid(pid)).unwrap_or(-1);
    Ok(status as u32)
}

pub(crate) fn sys_create(ctx: &mut SyscallCtx, name_ptr: VirtAddr, size: u32) -> SysResult {
    let name = ctx.validate_string(name_ptr)?;
    let created = ctx.kernel.filesys.lock().create(&name, size);
    Ok(created as u32)
}

pub(crate) fn sys_remove(ctx: &mut SyscallCtx, name_ptr: VirtAddr) -> SysResult {
    let name = ctx.validate_string(name_ptr)?;
    let removed = ctx.kernel.filesys.lock().remove(&name);
    Ok(removed as u32)
}

pub(crate) fn sys_open(ctx: &mut SyscallCtx, name_ptr: VirtAddr) -> SysResult {
    let name = ctx.validate_string(name_ptr)?;
    let file = ctx.kernel.filesys.lock().open(&name);
    match file {
        Some(file) => Ok(ctx.proc.fds.lock().install(file)),
        None => Ok(u32::MAX),
    }
}

pub(crate) fn sys_filesize(ctx: &mut SyscallCtx, fd: u32) -> SysResult {
    let file = ctx.file(fd)?;
    let _fs = ctx.kernel.filesys.lock();
    Ok(file.length())
}

pub(crate) fn sys_read(ctx: &mut SyscallCtx, fd: u32, buf: VirtAddr, len: u32) -> SysResult {
    if fd == STDOUT_FILENO {
        return Err(Trap::Exit(-1));
    }
    ctx.validate_range(buf, len)?;

    if fd == STDIN_FILENO {
        for i in 0..len {
            let key = ctx.kernel.console.getc();
            if !uaccess::copy_to_user(ctx.proc, buf + i as u64, &[key]) {
                return Err(Trap::Exit(-1));
            }
        }
        return Ok(len);
    }

    let file = ctx.file(fd)?;
    let mut chunk = vec![0u8; PAGE_SIZE];
    let mut total: u32 = 0;

    let _fs = ctx.kernel.filesys.lock();
    while total < len {
        let want = ((len - total) as usize).min(chunk.len());
        let got = file.read(&mut chunk[..want]);
        if got == 0 {
            break;
        }
        if !uaccess::copy_to_user(ctx.proc, buf + total as u64, &chunk[..got as usize]) {
            return Err(Trap::Exit(-1));
        }
        total += got;
    }
    Ok(total)
}

pub(crate) fn sys_write(ctx: &mut SyscallCtx, fd: u32, buf: VirtAddr, len: u32) -> SysResult {
    if fd == STDIN_FILENO {
        return Err(Trap::Exit(-1));
    }
    ctx.validate_range(buf, len)?;

    let mut chunk = vec![0u8; PAGE_SIZE];

    if fd == STDOUT_FILENO {
        let mut total: u32 = 0;
        while total < len {
            let want = ((len - total) as usize).min(chunk.len());
            if !uaccess::copy_from_user(ctx.proc, buf + total as u64, &mut chunk[..want]) {
                return Err(Trap::Exit(-1));
            }
            ctx.kernel.console.putbuf(&chunk[..want]);
            total += want as u32;
        }
        return Ok(len);
    }

    let file = ctx.file(fd)?;
    let mut total: u32 = 0;

    let _fs = ctx.kernel.filesys.lock();
    while total < len {
        let want = ((len - total) as usize).min(chunk.len());
        if !uaccess::copy_from_user(ctx.proc, buf + total as u64, &mut chunk[..want]) {
            return Err(Trap::Exit(-1));
        }
        let put = file.write(&chunk[..want]);
        total += put;
        if (put as usize) < want {
            // Zero progress past the end of the file; report what landed
            break;
        }
    }
    Ok(total)
}

pub(crate) fn sys_seek(ctx: &mut SyscallCtx, fd: u32, pos: u32) -> SysResult {
    let file = ctx.file(fd)?;
    let _fs = ctx.kernel.filesys.lock();
    file.seek(pos);
    Ok(0)
}

pub(crate) fn sys_tell(ctx: &mut SyscallCtx, fd: u32) -> SysResult {
    let file = ctx.file(fd)?;
    let _fs = ctx.kernel.filesys.lock();
    Ok(file.tell())
}

pub(crate) fn sys_close(ctx: &mut SyscallCtx, fd: u32) -> SysResult {
    if ctx.proc.fds.lock().close(fd) {
        Ok(0)
    } else {
        Err(Trap::Exit(-1))
    }
}

pub(crate) fn sys_mmap(ctx: &mut SyscallCtx, fd: u32, addr: VirtAddr) -> SysResult {
    if fd == STDIN_FILENO || fd == STDOUT_FILENO {
        return Ok(MAP_FAILED);
    }
    let Some(file) = ctx.proc.fds.lock().get(fd) else {
        return Ok(MAP_FAILED);
    };

    let a = addr.as_u64();
    if a == 0 || a % PAGE_SIZE as u64 != 0 || !crate::memory::is_user_vaddr(addr) {
        return Ok(MAP_FAILED);
    }

    let (length, region_file) = {
        let _fs = ctx.kernel.filesys.lock();
        let length = file.length();
        if length == 0 {
            return Ok(MAP_FAILED);
        }
        (length, file.reopen())
    };

    let pages = (length as usize + PAGE_SIZE - 1) / PAGE_SIZE;
    let end = a + (pages * PAGE_SIZE) as u64;
    // The region must stay strictly below the stack
    if end > STACK_LIMIT {
        return Ok(MAP_FAILED);
    }

    let base = Page::containing_address(addr);
    let id = ctx.proc.maps.lock().next_id();

    let mut spt = ctx.proc.page_map.lock();
    for i in 0..pages {
        let upage = base + i as u64;
        let offset = (i * PAGE_SIZE) as u32;
        let bytes = if i == pages - 1 {
            length - offset
        } else {
            PAGE_SIZE as u32
        };
        if spt
            .alloc_file(upage, region_file.clone(), offset, bytes, Some(id), true)
            .is_err()
        {
            // Roll back what this mmap installed; the reopened file closes
            // with the last clone dropped
            for j in 0..i {
                spt.remove(base + j as u64);
            }
            return Ok(MAP_FAILED);
        }
    }
    drop(spt);

    ctx.proc.maps.lock().insert(
        id,
        Mapping {
            base,
            pages,
            file: region_file,
        },
    );
    Ok(id.0)
}

pub(crate) fn sys_munmap(ctx: &mut SyscallCtx, id: u32) -> SysResult {
    page::munmap(ctx.kernel, ctx.proc, MapId(id)).map_err(|_| Trap::Exit(-1))?;
    Ok(0)
}
