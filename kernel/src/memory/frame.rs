// Frame table: the process-wide registry of user-pool frames currently
// backing a user page, and the clock eviction that reclaims one when the
// pool runs dry.
//
// Lock order: frame table -> process registry -> victim SPT -> victim
// pagedir, with the swap and filesystem locks taken only as leaves (and
// never while a pagedir lock is held). SPT operations therefore must not
// call in here while holding their own SPT lock.
use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use core::ptr;
use spin::Mutex;
use x86_64::structures::paging::Page;
use x86_64::PhysAddr;

use crate::kctx::Kernel;
use crate::process::Pid;

use super::page::PageLocation;
use super::{frame_ptr, PAGE_SIZE};

#[derive(Clone, Copy)]
pub struct FrameEntry {
    pub upage: Page,
    pub owner: Pid,
    pub pinned: bool,
}

struct FrameTableState {
    entries: BTreeMap<u64, FrameEntry>,
    // Clock order: candidates are examined at the front and get their
    // second chance at the back.
    queue: VecDeque<u64>,
}

pub struct FrameTable {
    state: Mutex<FrameTableState>,
}

impl FrameTable {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FrameTableState {
                entries: BTreeMap::new(),
                queue: VecDeque::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<(PhysAddr, Pid, Page, bool)> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|(&kpage, e)| (PhysAddr::new(kpage), e.owner, e.upage, e.pinned))
            .collect()
    }
}

impl Default for FrameTable {
    fn default() -> Self {
        Self::new()
    }
}

// Obtain a frame for `upage`, evicting somebody else's page if the user
// pool is exhausted. Never fails: capacity bugs panic instead.
pub fn frame_alloc(kernel: &Kernel, owner: Pid, upage: Page, pinned: bool) -> PhysAddr {
    let kpage = kernel
        .pool
        .alloc()
        .unwrap_or_else(|| evict(kernel));

    let mut state = kernel.frames.state.lock();
    state.entries.insert(
        kpage.as_u64(),
        FrameEntry {
            upage,
            owner,
            pinned,
        },
    );
    state.queue.push_back(kpage.as_u64());
    kpage
}

// Deregister the frame and hand it back to the user pool.
pub fn frame_free(kernel: &Kernel, kpage: PhysAddr) {
    let mut state = kernel.frames.state.lock();
    let removed = state.entries.remove(&kpage.as_u64());
    debug_assert!(removed.is_some(), "freeing an unregistered frame");
    state.queue.retain(|&k| k != kpage.as_u64());
    drop(state);
    kernel.pool.free(kpage);
}

pub fn set_pinned(kernel: &Kernel, kpage: PhysAddr, pinned: bool) {
    let mut state = kernel.frames.state.lock();
    if let Some(entry) = state.entries.get_mut(&kpage.as_u64()) {
        entry.pinned = pinned;
    }
}

// Clock / second-chance eviction. Runs with the frame-table lock held for
// the whole selection and write-out, so a victim observed unpinned cannot
// be concurrently freed under us. The pinned flag is re-checked under the
// victim's SPT lock, which closes the race against a pinner that set the
// descriptor flag but has not reached the frame table yet.
fn evict(kernel: &Kernel) -> PhysAddr {
    let mut state = kernel.frames.state.lock();
    let mut pinned_streak = 0usize;

    loop {
        let kpage = state
            .queue
            .pop_front()
            .unwrap_or_else(|| panic!("eviction with an empty frame table"));
        let entry = *state
            .entries
            .get(&kpage)
            .unwrap_or_else(|| panic!("frame queue out of sync with the table"));

        if entry.pinned {
            state.queue.push_back(kpage);
            pinned_streak += 1;
            assert!(
                pinned_streak <= state.queue.len(),
                "every user frame is pinned"
            );
            continue;
        }

        let owner = kernel
            .procs
            .get(entry.owner)
            .unwrap_or_else(|| panic!("frame owner exited without freeing its frames"));

        let mut spt = owner.page_map.lock();
        let slot = match spt.lookup_mut(entry.upage) {
            Some(slot) => slot,
            None => panic!("frame table entry without a page descriptor"),
        };
        if slot.pinned {
            drop(spt);
            state.queue.push_back(kpage);
            pinned_streak += 1;
            assert!(
                pinned_streak <= state.queue.len(),
                "every user frame is pinned"
            );
            continue;
        }
        debug_assert_eq!(slot.location, PageLocation::InFrame(PhysAddr::new(kpage)));

        {
            let mut pagedir = owner.pagedir.lock();
            if pagedir.is_accessed(entry.upage) {
                // Second chance: strip the reference bit and move on
                pagedir.clear_accessed(entry.upage);
                drop(pagedir);
                drop(spt);
                state.queue.push_back(kpage);
                pinned_streak = 0;
                continue;
            }
        }

        // Victim found. Pull the mapping first so the owner faults (and
        // blocks on our SPT lock) instead of racing the write-out.
        let dirty = {
            let mut pagedir = owner.pagedir.lock();
            let dirty = pagedir.is_dirty(entry.upage);
            pagedir.clear(entry.upage);
            dirty
        };

        let victim = PhysAddr::new(kpage);
        if let Some(backing) = slot.file.clone() {
            if dirty && slot.writable {
                // SAFETY: the mapping is gone and the frame lock is held;
                // nobody else touches this frame now.
                let data = unsafe {
                    core::slice::from_raw_parts(frame_ptr(victim), backing.bytes as usize)
                };
                let _fs = kernel.filesys.lock();
                backing.file.write_at(data, backing.offset);
            }
            slot.location = PageLocation::InFile;
        } else {
            let slot_idx = kernel.swap.write_page(victim);
            slot.location = PageLocation::InSwap(slot_idx);
        }
        drop(spt);

        state.entries.remove(&kpage);

        // Scrub the frame before reuse; debug builds poison it instead so
        // stale reads stand out.
        let fill = if cfg!(debug_assertions) { 0x5a } else { 0 };
        // SAFETY: the frame is deregistered and unmapped.
        unsafe { ptr::write_bytes(frame_ptr(victim), fill, PAGE_SIZE) };

        return victim;
    }
}
