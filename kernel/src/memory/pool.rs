// User pool: the fixed arena of physical frames available to back user
// pages, with a bitmap allocator over the frame indices.
use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::vec::Vec;
use core::ptr::NonNull;
use spin::Mutex;
use x86_64::PhysAddr;

use super::PAGE_SIZE;

struct PoolState {
    bitmap: Vec<u64>,
    next_free: usize,
    total_frames: usize,
    free_frames: usize,
}

impl PoolState {
    fn is_frame_free(&self, frame_num: usize) -> bool {
        let word = frame_num / 64;
        let bit = frame_num % 64;
        self.bitmap[word] & (1 << bit) == 0
    }

    fn mark_frame_used(&mut self, frame_num: usize) {
        let word = frame_num / 64;
        let bit = frame_num % 64;
        debug_assert!(self.bitmap[word] & (1 << bit) == 0);
        self.bitmap[word] |= 1 << bit;
        self.free_frames -= 1;
    }

    fn mark_frame_free(&mut self, frame_num: usize) {
        let word = frame_num / 64;
        let bit = frame_num % 64;
        debug_assert!(self.bitmap[word] & (1 << bit) != 0);
        self.bitmap[word] &= !(1 << bit);
        self.free_frames += 1;
    }

    fn allocate(&mut self) -> Option<usize> {
        for frame_num in self.next_free..self.total_frames {
            if self.is_frame_free(frame_num) {
                self.mark_frame_used(frame_num);
                self.next_free = frame_num + 1;
                return Some(frame_num);
            }
        }
        // Wrap around and search from the beginning
        for frame_num in 0..self.next_free.min(self.total_frames) {
            if self.is_frame_free(frame_num) {
                self.mark_frame_used(frame_num);
                self.next_free = frame_num + 1;
                return Some(frame_num);
            }
        }
        None
    }
}

pub struct UserPool {
    base: NonNull<u8>,
    layout: Layout,
    state: Mutex<PoolState>,
}

// SAFETY: the arena is only reached through frame addresses handed out by
// the bitmap, one owner per frame; the bitmap itself sits under a lock.
unsafe impl Send for UserPool {}
unsafe impl Sync for UserPool {}

impl UserPool {
    pub fn new(frames: usize) -> Self {
        assert!(frames > 0, "user pool needs at least one frame");
        let layout = Layout::from_size_align(frames * PAGE_SIZE, PAGE_SIZE)
            .expect("user pool layout");
        // SAFETY: layout has non-zero size.
        let base = unsafe { alloc_zeroed(layout) };
        let base = NonNull::new(base).expect("user pool arena allocation failed");

        let words = (frames + 63) / 64;
        let mut bitmap = Vec::with_capacity(words);
        bitmap.resize(words, 0);

        Self {
            base,
            layout,
            state: Mutex::new(PoolState {
                bitmap,
                next_free: 0,
                total_frames: frames,
                free_frames: frames,
            }),
        }
    }

    pub fn alloc(&self) -> Option<PhysAddr> {
        let frame_num = self.state.lock().allocate()?;
        Some(PhysAddr::new(
            self.base.as_ptr() as u64 + (frame_num * PAGE_SIZE) as u64,
        ))
    }

    pub fn free(&self, kpage: PhysAddr) {
        let frame_num = self.frame_index(kpage);
        // SAFETY: frame_index checked that kpage is an arena frame, and the
        // caller is handing it back, so nobody else writes through it.
        unsafe {
            core::ptr::write_bytes(kpage.as_u64() as *mut u8, 0, PAGE_SIZE);
        }
        self.state.lock().mark_frame_free(frame_num);
    }

    pub fn contains(&self, kpage: PhysAddr) -> bool {
        let base = self.base.as_ptr() as u64;
        let addr = kpage.as_u64();
        let total = self.state.lock().total_frames;
        addr >= base
            && addr < base + (total * PAGE_SIZE) as u64
            && (addr - base) % PAGE_SIZE as u64 == 0
    }

    fn frame_index(&self, kpage: PhysAddr) -> usize {
        assert!(self.contains(kpage), "address is not a user-pool frame");
        ((kpage.as_u64() - self.base.as_ptr() as u64) / PAGE_SIZE as u64) as usize
    }

    // (free, total)
    pub fn stats(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.free_frames, state.total_frames)
    }
}

impl Drop for UserPool {
    fn drop(&mut self) {
        // SAFETY: base was allocated with exactly this layout.
        unsafe { dealloc(self.base.as_ptr(), self.layout) };
    }
}
