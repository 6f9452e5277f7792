// Supplementary page table: one descriptor per user page recording where
// its contents currently live (nowhere yet, in a frame, in a swap slot or
// on the filesystem) plus the demand-load, stack-growth, pinning and
// teardown paths that move pages between those states.
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ptr;
use x86_64::structures::paging::Page;
use x86_64::{PhysAddr, VirtAddr};

use crate::fs::File;
use crate::kctx::Kernel;
use crate::process::{MapId, Process};

use super::{frame, frame_ptr, PAGE_SIZE, STACK_LIMIT, STACK_SLACK, USER_TOP};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PageLocation {
    // Zero-backed, nothing materialised yet
    NotPresent,
    // Resident in the user-pool frame at this address
    InFrame(PhysAddr),
    // Contents live in this swap slot
    InSwap(usize),
    // Contents live in the backing file
    InFile,
}

#[derive(Clone)]
pub struct FileBacking {
    pub file: Arc<dyn File>,
    pub offset: u32,
    // Bytes actually backed by the file; the page tail past this reads as
    // zero and is never written back.
    pub bytes: u32,
}

pub struct PageSlot {
    pub location: PageLocation,
    pub file: Option<FileBacking>,
    pub writable: bool,
    pub mapping: Option<MapId>,
    // Resident and exempt from eviction
    pub pinned: bool,
}

impl PageSlot {
    fn new_zero(writable: bool) -> Self {
        Self {
            location: PageLocation::NotPresent,
            file: None,
            writable,
            mapping: None,
            pinned: false,
        }
    }

    fn new_file(backing: FileBacking, mapping: Option<MapId>, writable: bool) -> Self {
        Self {
            location: PageLocation::InFile,
            file: Some(backing),
            writable,
            mapping,
            pinned: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SptError {
    Exists,
    BadLength,
    UnknownMapping,
}

pub struct PageMap {
    slots: BTreeMap<Page, PageSlot>,
}

impl PageMap {
    pub fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
        }
    }

    pub fn lookup(&self, upage: Page) -> Option<&PageSlot> {
        self.slots.get(&upage)
    }

    pub fn lookup_mut(&mut self, upage: Page) -> Option<&mut PageSlot> {
        self.slots.get_mut(&upage)
    }

    // Install a zero-backed descriptor; the page materialises on first
    // fault.
    pub fn alloc_zero(&mut self, upage: Page, writable: bool) -> Result<(), SptError> {
        if self.slots.contains_key(&upage) {
            return Err(SptError::Exists);
        }
        self.slots.insert(upage, PageSlot::new_zero(writable));
        Ok(())
    }

    // Install a file-backed descriptor reading `bytes` bytes at `offset`.
    pub fn alloc_file(
        &mut self,
        upage: Page,
        file: Arc<dyn File>,
        offset: u32,
        bytes: u32,
        mapping: Option<MapId>,
        writable: bool,
    ) -> Result<(), SptError> {
        if bytes == 0 || bytes as usize > PAGE_SIZE {
            return Err(SptError::BadLength);
        }
        if self.slots.contains_key(&upage) {
            return Err(SptError::Exists);
        }
        let backing = FileBacking {
            file,
            offset,
            bytes,
        };
        self.slots
            .insert(upage, PageSlot::new_file(backing, mapping, writable));
        Ok(())
    }

    pub fn remove(&mut self, upage: Page) -> Option<PageSlot> {
        self.slots.remove(&upage)
    }

    pub fn pages(&self) -> Vec<Page> {
        self.slots.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Page, &PageSlot)> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for PageMap {
    fn default() -> Self {
        Self::new()
    }
}

enum LoadSource {
    Zero,
    Swap(usize),
    Backing(FileBacking),
}

// Make `upage` resident. Idempotent when it already is. The caller has set
// the descriptor's pinned flag beforehand when it needs the page held; the
// frame is registered pinned either way and the caller clears it.
//
// The SPT lock is dropped around frame_alloc: eviction takes the frame
// table lock first and then the victim's SPT lock, so holding our own SPT
// lock across an allocation could deadlock against an evictor.
pub fn force_load(kernel: &Kernel, proc: &Process, upage: Page) -> Result<PhysAddr, &'static str> {
    let (source, writable) = {
        let spt = proc.page_map.lock();
        let slot = spt.lookup(upage).ok_or("page is not tracked")?;
        match slot.location {
            PageLocation::InFrame(kpage) => return Ok(kpage),
            PageLocation::NotPresent => (LoadSource::Zero, slot.writable),
            PageLocation::InSwap(slot_idx) => (LoadSource::Swap(slot_idx), slot.writable),
            PageLocation::InFile => {
                let backing = slot.file.clone().ok_or("file page lost its backing")?;
                (LoadSource::Backing(backing), slot.writable)
            }
        }
    };

    let kpage = frame::frame_alloc(kernel, proc.pid, upage, true);
    match source {
        LoadSource::Zero => {
            // SAFETY: kpage was just handed to us by the frame allocator.
            unsafe { ptr::write_bytes(frame_ptr(kpage), 0, PAGE_SIZE) };
        }
        LoadSource::Swap(slot_idx) => {
            let ok = kernel.swap.load_page(slot_idx, kpage);
            assert!(ok, "swap slot {} lost its contents", slot_idx);
        }
        LoadSource::Backing(backing) => {
            // SAFETY: as above; nobody else references this frame yet.
            let buf = unsafe { core::slice::from_raw_parts_mut(frame_ptr(kpage), PAGE_SIZE) };
            {
                let _fs = kernel.filesys.lock();
                backing
                    .file
                    .read_at(&mut buf[..backing.bytes as usize], backing.offset);
            }
            for b in &mut buf[backing.bytes as usize..] {
                *b = 0;
            }
        }
    }

    {
        let mut spt = proc.page_map.lock();
        let slot = spt
            .lookup_mut(upage)
            .ok_or("page vanished during demand load")?;
        slot.location = PageLocation::InFrame(kpage);
    }
    let installed = proc.pagedir.lock().install(upage, kpage, writable);
    debug_assert!(installed, "stale hardware mapping during demand load");
    Ok(kpage)
}

// Heuristic for faults just below (or at/above) the stack pointer: inside
// the stack region and within STACK_SLACK bytes below esp, install a fresh
// zero page. Returns true as well when the page is already tracked.
pub fn grow_stack_if_necessary(proc: &Process, esp: VirtAddr, addr: VirtAddr) -> bool {
    let a = addr.as_u64();
    if a < STACK_LIMIT || a >= USER_TOP {
        return false;
    }
    let upage = Page::containing_address(addr);
    let mut spt = proc.page_map.lock();
    if spt.lookup(upage).is_some() {
        return true;
    }
    if a >= esp.as_u64().saturating_sub(STACK_SLACK) || a >= esp.as_u64() {
        spt.alloc_zero(upage, true).is_ok()
    } else {
        false
    }
}

// Pin `upage`: set the descriptor flag, make the page resident, and mark
// the frame-table entry so eviction skips it.
pub fn pin_page(kernel: &Kernel, proc: &Process, upage: Page) -> Result<PhysAddr, &'static str> {
    {
        let mut spt = proc.page_map.lock();
        let slot = spt.lookup_mut(upage).ok_or("page is not tracked")?;
        slot.pinned = true;
    }
    let kpage = force_load(kernel, proc, upage)?;
    frame::set_pinned(kernel, kpage, true);
    Ok(kpage)
}

pub fn unpin_page(kernel: &Kernel, proc: &Process, upage: Page) {
    let resident = {
        let mut spt = proc.page_map.lock();
        match spt.lookup_mut(upage) {
            Some(slot) => {
                slot.pinned = false;
                match slot.location {
                    PageLocation::InFrame(kpage) => Some(kpage),
                    _ => None,
                }
            }
            None => None,
        }
    };
    if let Some(kpage) = resident {
        frame::set_pinned(kernel, kpage, false);
    }
}

// Destroy one descriptor: flush dirty file-backed contents, release the
// frame or swap slot, and drop the hardware mapping.
pub fn free_page(kernel: &Kernel, proc: &Process, upage: Page) {
    let (location, backing, writable) = {
        let mut spt = proc.page_map.lock();
        let slot = match spt.lookup_mut(upage) {
            Some(slot) => slot,
            None => return,
        };
        // Keep eviction away while the page is torn down
        slot.pinned = true;
        (slot.location, slot.file.clone(), slot.writable)
    };

    match location {
        PageLocation::InFrame(kpage) => {
            let dirty = proc.pagedir.lock().is_dirty(upage);
            if let Some(backing) = backing {
                if dirty && writable {
                    // SAFETY: the page is pinned, so the frame stays ours
                    // until frame_free below.
                    let data = unsafe {
                        core::slice::from_raw_parts(frame_ptr(kpage), backing.bytes as usize)
                    };
                    let _fs = kernel.filesys.lock();
                    backing.file.write_at(data, backing.offset);
                }
            }
            proc.pagedir.lock().clear(upage);
            frame::frame_free(kernel, kpage);
        }
        PageLocation::InSwap(slot_idx) => kernel.swap.release(slot_idx),
        PageLocation::NotPresent | PageLocation::InFile => {}
    }

    proc.page_map.lock().remove(upage);
}

// Unmap a whole mmap region, flushing dirty pages and closing the
// region's reopened file (its last reference drops with the mapping).
pub fn munmap(kernel: &Kernel, proc: &Process, id: MapId) -> Result<(), SptError> {
    let mapping = proc
        .maps
        .lock()
        .remove(id)
        .ok_or(SptError::UnknownMapping)?;
    let mut upage = mapping.base;
    for _ in 0..mapping.pages {
        free_page(kernel, proc, upage);
        upage = upage + 1u64;
    }
    Ok(())
}

// Process-exit teardown of the whole table.
pub fn destroy_page_map(kernel: &Kernel, proc: &Process) {
    let pages = proc.page_map.lock().pages();
    for upage in pages {
        free_page(kernel, proc, upage);
    }
}
