// Kernel access to user memory. Every helper here requires the touched
// pages to be resident (the syscall gate pins them first) and walks the
// page directory page by page, updating accessed/dirty bits the way the
// MMU would for a user access.
use x86_64::structures::paging::{Page, PageTableFlags};
use x86_64::VirtAddr;

use crate::process::Process;

use super::{frame_ptr, PAGE_SIZE};

// Copy `src` into user memory at `dst`. Fails if any page is unmapped or
// read-only.
pub fn copy_to_user(proc: &Process, dst: VirtAddr, src: &[u8]) -> bool {
    let mut copied = 0usize;
    while copied < src.len() {
        let va = dst + copied as u64;
        let upage = Page::containing_address(va);
        let offset = (va.as_u64() % PAGE_SIZE as u64) as usize;
        let chunk = (PAGE_SIZE - offset).min(src.len() - copied);

        let mut pagedir = proc.pagedir.lock();
        let (kpage, flags) = match pagedir.translate(upage) {
            Some(entry) => entry,
            None => return false,
        };
        if !flags.contains(PageTableFlags::WRITABLE) {
            return false;
        }
        // SAFETY: the mapping is live and the page is pinned by the
        // caller, so the frame stays put for the duration of the copy.
        unsafe {
            core::ptr::copy_nonoverlapping(
                src[copied..].as_ptr(),
                frame_ptr(kpage).add(offset),
                chunk,
            );
        }
        pagedir.mark_access(upage, true);
        drop(pagedir);

        copied += chunk;
    }
    true
}

// Copy user memory at `src` into `dst`. Fails if any page is unmapped.
pub fn copy_from_user(proc: &Process, src: VirtAddr, dst: &mut [u8]) -> bool {
    let mut copied = 0usize;
    while copied < dst.len() {
        let va = src + copied as u64;
        let upage = Page::containing_address(va);
        let offset = (va.as_u64() % PAGE_SIZE as u64) as usize;
        let chunk = (PAGE_SIZE - offset).min(dst.len() - copied);

        let mut pagedir = proc.pagedir.lock();
        let (kpage, _) = match pagedir.translate(upage) {
            Some(entry) => entry,
            None => return false,
        };
        // SAFETY: as in copy_to_user.
        unsafe {
            core::ptr::copy_nonoverlapping(
                frame_ptr(kpage).add(offset),
                dst[copied..].as_mut_ptr(),
                chunk,
            );
        }
        pagedir.mark_access(upage, false);
        drop(pagedir);

        copied += chunk;
    }
    true
}

pub fn read_user_u32(proc: &Process, addr: VirtAddr) -> Option<u32> {
    let mut bytes = [0u8; 4];
    if !copy_from_user(proc, addr, &mut bytes) {
        return None;
    }
    Some(u32::from_le_bytes(bytes))
}

pub fn read_user_byte(proc: &Process, addr: VirtAddr) -> Option<u8> {
    let mut byte = [0u8; 1];
    if !copy_from_user(proc, addr, &mut byte) {
        return None;
    }
    Some(byte[0])
}
