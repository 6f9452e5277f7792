// Per-process page directory. The hardware install/clear/accessed/dirty
// interface, kept as a software shadow of the real page tables so the rest
// of the core can query and update mappings uniformly.
use alloc::collections::BTreeMap;
use x86_64::structures::paging::{Page, PageTableFlags};
use x86_64::PhysAddr;

#[derive(Clone, Copy)]
struct PdEntry {
    kpage: PhysAddr,
    flags: PageTableFlags,
}

pub struct PageDir {
    entries: BTreeMap<Page, PdEntry>,
}

impl PageDir {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    // Map upage to kpage. Fails if a mapping is already installed.
    pub fn install(&mut self, upage: Page, kpage: PhysAddr, writable: bool) -> bool {
        if self.entries.contains_key(&upage) {
            return false;
        }
        let mut flags = PageTableFlags::PRESENT | PageTableFlags::USER_ACCESSIBLE;
        if writable {
            flags |= PageTableFlags::WRITABLE;
        }
        self.entries.insert(upage, PdEntry { kpage, flags });
        true
    }

    // Remove the mapping, accessed and dirty state included.
    pub fn clear(&mut self, upage: Page) {
        self.entries.remove(&upage);
    }

    pub fn translate(&self, upage: Page) -> Option<(PhysAddr, PageTableFlags)> {
        self.entries.get(&upage).map(|e| (e.kpage, e.flags))
    }

    pub fn is_mapped(&self, upage: Page) -> bool {
        self.entries.contains_key(&upage)
    }

    pub fn is_accessed(&self, upage: Page) -> bool {
        self.entries
            .get(&upage)
            .map(|e| e.flags.contains(PageTableFlags::ACCESSED))
            .unwrap_or(false)
    }

    pub fn clear_accessed(&mut self, upage: Page) {
        if let Some(entry) = self.entries.get_mut(&upage) {
            entry.flags &= !PageTableFlags::ACCESSED;
        }
    }

    pub fn is_dirty(&self, upage: Page) -> bool {
        self.entries
            .get(&upage)
            .map(|e| e.flags.contains(PageTableFlags::DIRTY))
            .unwrap_or(false)
    }

    // Record an access the way the MMU would: accessed always, dirty on
    // write.
    pub fn mark_access(&mut self, upage: Page, write: bool) {
        if let Some(entry) = self.entries.get_mut(&upage) {
            entry.flags |= PageTableFlags::ACCESSED;
            if write {
                entry.flags |= PageTableFlags::DIRTY;
            }
        }
    }
}

impl Default for PageDir {
    fn default() -> Self {
        Self::new()
    }
}
